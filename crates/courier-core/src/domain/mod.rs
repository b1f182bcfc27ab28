//! Domain model (operations, descriptors, trace identifiers, errors, events).

pub mod descriptor;
pub mod errors;
pub mod events;
pub mod operation;
pub mod trace;

pub use self::descriptor::{HttpRequest, ScheduleTime, TaskDescriptor, TaskRecord, TaskSpec, queue_path};
pub use self::errors::{
    DispatchError, DispatchErrorKind, QueueServiceError, TracingError, ValidationError, WorkflowError,
};
pub use self::events::DomainEvent;
pub use self::operation::{ErrorDetail, HttpMethod, MAX_SCHEDULE_OFFSET_SECONDS, Operation, OperationStatus};
pub use self::trace::{SpanContext, SpanId, TraceFlags, TraceId, TRACEPARENT_HEADER};
