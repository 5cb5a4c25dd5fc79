pub mod cbc;
pub mod ctr;
pub mod oracles;
pub mod protocols;
