//! Leiden community detection over weighted, undirected networks
#![deny(missing_docs)]
#![deny(warnings)]

/// Data structure for storing a clustering of nodes
pub mod clustering;

/// Data structure for storing a weighted, undirected graph (aka network)
pub mod network;

/// Leiden clustering algorithm
pub mod leiden;

/// Clustering quality functions
pub mod quality;

mod local_moving;
mod refine;


pub use clustering::Clustering;
pub use leiden::Leiden;
pub use network::Network;

trait ZeroVec {
    fn zero_len(&mut self, len: usize);
}

impl<T: Default> ZeroVec for Vec<T> {
    fn zero_len(&mut self, len: usize) {
        self.clear();
        self.resize_with(len, T::default)
    }
}
