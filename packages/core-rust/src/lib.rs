//! Catalog core: resource schemas, typed RPC messages, status codes, and codecs.

pub mod codec;
pub mod messages;
pub mod resource;
pub mod schema;
pub mod status;

pub use codec::CodecError;
pub use messages::{
    DeleteResponse, IdRequest, RpcEnvelope, RpcReply, RpcReplyEnvelope, RpcRequest,
};
pub use resource::{
    BookFields, ComicFields, Resource, ResourceFields, ResourceKind, Stored, UserFields,
};
pub use schema::{ColumnValue, FieldDef, FieldType, ResourceSchema, SchemaError};
pub use status::{Code, Status};
