//! The hierarchical test tree shown by the host.

mod builder;
mod node;

pub use builder::{append_top_level_files, sort_suites_by_label, sort_tests_by_location, TreeBuilder};
pub use node::{Node, SuiteNode, TestNode, ROOT_ID};
