pub mod api;
pub mod chunk;
pub mod error;
pub mod id_domain;
pub mod ids;
pub mod permutation;
pub mod placement;
pub mod salt;
pub mod schema;
pub mod value;

pub use api::*;
pub use chunk::*;
pub use error::{MeshError, MeshResult};
pub use id_domain::{IdSize, resolve, resolve_with};
pub use ids::*;
pub use permutation::{FeistelPermutation, PermutationOracle};
pub use placement::bucket_chunk_shard;
pub use schema::*;
pub use value::*;
