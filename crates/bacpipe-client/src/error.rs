use bacpipe_datalink::DataLinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("datalink error: {0}")]
    DataLink(#[from] DataLinkError),
    #[error("encode error: {0}")]
    Encode(#[from] bacpipe_core::EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] bacpipe_core::DecodeError),
    #[error("request timed out")]
    Timeout,
    #[error("no free invoke ID available")]
    InvokeIdsExhausted,
}
