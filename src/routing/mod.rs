//! Routing table learned from observed envelope paths.
//!
//! Every envelope a node processes carries the addresses it has traversed.
//! Consecutive addresses are recorded as bidirectional edges with the time
//! they were observed; shortest paths are found by breadth-first search over
//! a graph rebuilt from the live edges on each query.

mod table;

pub use table::{Edge, Graph, RoutingTable};
