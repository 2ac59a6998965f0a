use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method, Url,
};

use crate::{BodySupplier, Context, NetterError, Result};

/// One logical HTTP call, however many attempts it takes.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<BodySupplier>,
    context: Context,
}

impl Request {
    /// Parses `url` and creates a request with no headers, no body and a
    /// background context.
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(NetterError::InvalidUrl)?;
        Ok(Self::from_url(method, url))
    }

    pub fn from_url(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            context: Context::background(),
        }
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    /// Sets a header, replacing earlier values of the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<BodySupplier>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&BodySupplier> {
        self.body.as_ref()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Builds the `reqwest::Request` for one attempt, pulling a fresh body
    /// from the supplier.
    pub(crate) fn to_attempt(&self) -> Result<reqwest::Request> {
        let mut attempt = reqwest::Request::new(self.method.clone(), self.url.clone());
        *attempt.headers_mut() = self.headers.clone();
        if let Some(supplier) = &self.body {
            let body = supplier.materialize().map_err(NetterError::Body)?;
            *attempt.body_mut() = Some(body);
        }
        Ok(attempt)
    }
}
