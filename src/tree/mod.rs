pub mod boundingbox;
pub(crate) mod cut;
pub(crate) mod nodestore;
pub mod nodeview;
#[allow(clippy::module_inception)]
pub(crate) mod tree;
