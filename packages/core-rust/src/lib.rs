//! Switchyard core: dynamic values, invocation addressing, codec negotiation,
//! and the structured error model. Synchronous; no async runtime.

pub mod bag;
pub mod codec;
pub mod error;
pub mod receiver;
pub mod value;

pub use bag::DataBag;
pub use codec::{Codec, CodecError, CodecExt, Codecs, JsonCodec, MsgPackCodec, RawCodec};
pub use error::{ErrCode, ErrorExposure, ErrorTemplates, FlatError, StructuredError};
pub use receiver::{AddressError, Receiver};
pub use value::{Value, ValueError};
