use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("Error serializing or deserializing json: {err}")]
    SerdeJson {
        #[from]
        err: serde_json::Error,
    },
    #[error("Error interpreting UTF-8 string: {err}")]
    FromUtf8Error {
        #[from]
        err: std::string::FromUtf8Error,
    },
}

pub type IResult<T> = Result<T, ErrorKind>;
