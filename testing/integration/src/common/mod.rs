pub mod block_node_simulator;
