mod codec;
mod error;
mod protocol;
mod transport;
mod types;

pub use codec::{FrameError, MAX_FRAME_LEN, read_frame, write_frame};
pub use error::StoreError;
pub use protocol::{Request, Response};
pub use transport::{ConnectOptions, Connector, Endpoint, EndpointError, Transport, TransportError};
pub use types::{
    AuthRequest, Column, ColumnOrSuperColumn, ColumnParent, ColumnPath, ConsistencyLevel,
    Deletion, KeySlice, Mutation, MutationMap, SlicePredicate, SliceRange, SuperColumn, Timestamp,
};
