//! Common imports for typical session usage.
pub use crate::{
    AbortHandle, Client, ContentInput, ContentPart, FieldType, FinalOutput, GenerationParams,
    LiveServerEvent, LiveSession, LiveState, Message, RealtimeInput, Record, ResponseStream, Role,
    SchemaContract, Session, SessionConfig, SessionError,
};
