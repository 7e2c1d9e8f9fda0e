pub mod async_tracker;
pub mod frame_lock;
pub mod handle;
pub mod model_cache;
pub mod record;
pub mod registry;
pub mod section;
pub mod virtual_model;

pub use handle::{DataKey, DataKind, FlushFlags, ModelHandle, RecordFlags};
pub use model_cache::{
    CacheError, CacheNotify, ERROR_MODEL_NAME, MeshData, ModelCache, ModelCacheBuilder, ModelPart, VertexPayload,
};
