#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- target not found ------------------------------------------
    #[error("thread {0} not found")]
    ThreadNotFound(i32),
    #[error("frame number {0} not found")]
    FrameNotFound(usize),
    #[error("variable `{0}` not found")]
    VariableNotFound(String),
    #[error("unknown source file `{0}`")]
    UnknownFile(String),
    #[error("unknown class `{0}`")]
    UnknownClass(String),

    // --------------------------------- target not stopped ----------------------------------------
    #[error("thread {0} is running")]
    ThreadNotStopped(i32),

    // --------------------------------- profiler --------------------------------------------------
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(target: "stackline", "{:#}", e);
                None
            }
        }
    };
    ($res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(target: "stackline", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}
