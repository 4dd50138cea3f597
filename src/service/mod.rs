// ============================================================================
// Service Runtime
// ============================================================================
//
// The mirror image of the gateway: bus messages decode back into HTTP
// requests and dispatch through an internal router to typed handlers.
//
// Registration is typed (`route<Req, Res>`): the handler's request and
// response types are named at registration time, so the compiler enforces
// the signature contract that the wire protocol assumes. Reply values
// encode by shape: strings pass verbatim, scalars are stringified,
// structured values are JSON.
//
// ============================================================================

mod router;
mod server;

pub use router::{encode_value, Reply, RequestContext, ServiceRouter};
pub use server::{ServiceConfig, ServiceServer};
