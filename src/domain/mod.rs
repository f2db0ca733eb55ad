pub mod callgraph;
pub mod imports;
pub mod index;
pub mod inject;
pub mod manager;
pub mod package;
pub mod recognizer;
pub mod render;
pub mod syntax;
pub mod traversal;
