pub mod cluster;
pub mod contact;
pub mod ensemble;
pub mod error;
pub mod exclusion;
pub mod geomio;
pub mod labels;
pub mod mesh;
pub mod particle;
pub mod pool;
pub mod region;
pub mod settings;
pub mod shape;
pub mod table;
