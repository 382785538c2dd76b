use crate::address::{Recipient, Sender};

/// One message addressed to one recipient, what the dispatcher forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: Sender,
    pub to: Recipient,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Vec<u8>>,
}
