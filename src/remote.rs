use crate::expense::{Directive, Expense};
use log::{debug, trace};
use thiserror::Error;

/// Failure talking to the remote ledger. None of these are fatal; at worst the local
/// ledger diverges from the remote until the next full pull.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("request to the remote ledger failed: {0}")]
    Transport(String),
    #[error("remote ledger answered with status {0}")]
    Status(u16),
    #[error("could not decode the remote ledger: {0}")]
    Decode(String),
}

/// An append/delete log of expenses living somewhere else.
///
/// Writes are send-and-forget: `post` succeeding only means the request went out, not
/// that the remote accepted it.
pub trait Remote {
    /// Every record on the remote, oldest first
    fn fetch_all(&self) -> Result<Vec<Expense>, NetworkError>;

    /// Send a single directive. The response is not inspected.
    fn post(&self, directive: &Directive) -> Result<(), NetworkError>;
}

/// A spreadsheet web app reached over plain HTTP
#[derive(Debug, Clone)]
pub struct HttpRemote {
    url: String,
}

impl HttpRemote {
    pub fn new<S: Into<String>>(url: S) -> Self {
        HttpRemote { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Remote for HttpRemote {
    fn fetch_all(&self) -> Result<Vec<Expense>, NetworkError> {
        debug!("pulling remote ledger from {}", self.url);

        let response = ureq::get(&self.url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => NetworkError::Status(code),
            ureq::Error::Transport(t) => NetworkError::Transport(t.to_string()),
        })?;

        let records: Vec<Expense> = response
            .into_json()
            .map_err(|e| NetworkError::Decode(e.to_string()))?;

        debug!("remote ledger has {} records", records.len());
        Ok(records)
    }

    fn post(&self, directive: &Directive) -> Result<(), NetworkError> {
        let body =
            serde_json::to_string(directive).map_err(|e| NetworkError::Decode(e.to_string()))?;
        trace!("posting {}", body);

        // The sheet endpoint doesn't accept preflighted requests, hence text/plain.
        match ureq::post(&self.url)
            .set("Content-Type", "text/plain")
            .send_string(&body)
        {
            Ok(_) => Ok(()),
            // The request reached the remote; whatever it made of it is unknowable.
            Err(ureq::Error::Status(code, _)) => {
                debug!("remote answered {} to a write, ignoring", code);
                Ok(())
            }
            Err(ureq::Error::Transport(t)) => Err(NetworkError::Transport(t.to_string())),
        }
    }
}
