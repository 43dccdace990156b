//! Per-request data and the application callback interface.

use std::collections::BTreeMap;

/// Decoded request parameters. Keys and values are raw bytes.
pub type Params = BTreeMap<Vec<u8>, Vec<u8>>;

/// The application's view of an in-flight request.
///
/// Callbacks read `params` and `input`, and append to `out` and `err`.
/// Output buffers are cleared once sent. `input` is only ever appended to
/// by the server; a callback that has consumed it should clear it.
#[derive(Debug, Default)]
pub struct Request {
    pub params: Params,
    pub input: Vec<u8>,
    pub out: Vec<u8>,
    pub err: Vec<u8>,
}

impl Request {
    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&[u8]> {
        self.params.get(name.as_bytes()).map(Vec::as_slice)
    }

    /// Look up a parameter and view it as UTF-8, if it is valid.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// Application callbacks invoked on the event-loop thread.
///
/// Every callback returns a status: 0 to continue, anything else ends the
/// request with that value as its application status. Callbacks must not
/// block; a slow callback stalls every connection.
pub trait Handler {
    /// Called once, when all parameters have been received. Input may
    /// still be arriving.
    fn on_params_ready(&mut self, _request: &mut Request) -> i32 {
        0
    }

    /// Called when new input has arrived and the request has not failed.
    fn on_data(&mut self, _request: &mut Request) -> i32 {
        0
    }

    /// Called once, when input is closed and the request has not failed.
    fn on_complete(&mut self, _request: &mut Request) -> i32 {
        0
    }
}

type Callback = Box<dyn FnMut(&mut Request) -> i32>;

/// A [`Handler`] assembled from independently held closures.
///
/// Callbacks left unset behave as if they returned 0.
#[derive(Default)]
pub struct FnHandler {
    params_ready: Option<Callback>,
    data: Option<Callback>,
    complete: Option<Callback>,
}

impl FnHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params_ready<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Request) -> i32 + 'static,
    {
        self.params_ready = Some(Box::new(f));
        self
    }

    pub fn data<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Request) -> i32 + 'static,
    {
        self.data = Some(Box::new(f));
        self
    }

    pub fn complete<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Request) -> i32 + 'static,
    {
        self.complete = Some(Box::new(f));
        self
    }
}

impl Handler for FnHandler {
    fn on_params_ready(&mut self, request: &mut Request) -> i32 {
        self.params_ready.as_mut().map_or(0, |f| f(request))
    }

    fn on_data(&mut self, request: &mut Request) -> i32 {
        self.data.as_mut().map_or(0, |f| f(request))
    }

    fn on_complete(&mut self, request: &mut Request) -> i32 {
        self.complete.as_mut().map_or(0, |f| f(request))
    }
}

impl std::fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler")
            .field("params_ready", &self.params_ready.is_some())
            .field("data", &self.data.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}
