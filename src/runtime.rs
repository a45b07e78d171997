use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Runtime};

use crate::error::{DriverError, Result};

// One runtime for the whole process; ODBC entry points are synchronous and
// may be called from any application thread.
static RUNTIME: Lazy<std::io::Result<Runtime>> = Lazy::new(|| {
    Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("whisker-io")
        .enable_all()
        .build()
});

pub fn block_on<F: std::future::Future>(fut: F) -> Result<F::Output> {
    match RUNTIME.as_ref() {
        Ok(rt) => Ok(rt.block_on(fut)),
        Err(e) => Err(DriverError::Runtime(e.to_string())),
    }
}
