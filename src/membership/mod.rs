//! Membership & Discovery Module
//!
//! Implements a Gossip-based membership protocol (inspired by SWIM) to manage the
//! cluster topology. Nodes use this service to discover each other, detect failures,
//! and disseminate cluster state updates.
//!
//! ## Core Mechanisms
//! - **Gossip Protocol**: Nodes periodically ping a random peer over UDP and exchange
//!   their full member view in the ack.
//! - **Failure Detection**: A "Suspect" -> "Dead" transition model with timeouts
//!   handles node crashes gracefully.
//! - **Incarnation Numbers**: A logical clock per node resolves disputed state
//!   (a falsely suspected node refutes the suspicion with a higher incarnation).
//!
//! The alive-member view feeds partition placement (`grid::PartitionManager`) and the
//! quorum check of the consensus lock service.

pub mod service;
pub mod types;
