use mail_parser::{HeaderValue, MessageParser, MimeHeaders};
use serde::{Deserialize, Serialize};

/// One mailbox of an address header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// The display name, if any.
    pub name: Option<String>,
    /// The `local@domain` part.
    pub email: Option<String>,
}

/// The header fields a mail client needs to list, thread and reply to a message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// `Date:` as a Unix timestamp.
    pub date: Option<i64>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    /// `type/subtype` of the top-level part.
    pub content_type: Option<String>,
    pub content_description: Option<String>,
    pub list_post: Option<String>,
    pub x_label: Option<String>,
    pub x_original_to: Option<String>,
    /// The `Lines:` header some servers add.
    pub lines: Option<u32>,
}

impl Envelope {
    /// Parse a block of RFC 5322 header fields.
    ///
    /// Unparseable input yields an empty envelope so one broken message cannot stall a
    /// mailbox sync.
    pub fn parse(headers: &[u8]) -> Envelope {
        let message = match MessageParser::default().parse(headers) {
            Some(message) => message,
            None => {
                log::debug!("unparseable header block of {} bytes", headers.len());
                return Envelope::default();
            }
        };

        let raw = |name: &str| message.header_raw(name).map(|s| s.trim().to_string());

        Envelope {
            date: message.date().map(|dt| dt.to_timestamp()),
            from: message.from().map(addresses).unwrap_or_default(),
            sender: message.sender().map(addresses).unwrap_or_default(),
            reply_to: message.reply_to().map(addresses).unwrap_or_default(),
            to: message.to().map(addresses).unwrap_or_default(),
            cc: message.cc().map(addresses).unwrap_or_default(),
            subject: message.subject().map(str::to_string),
            message_id: message.message_id().map(str::to_string),
            in_reply_to: text_list(message.in_reply_to()).into_iter().next(),
            references: text_list(message.references()),
            content_type: message.content_type().map(|ct| match ct.subtype() {
                Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                None => ct.ctype().to_string(),
            }),
            content_description: raw("Content-Description"),
            list_post: raw("List-Post"),
            x_label: raw("X-Label"),
            x_original_to: raw("X-Original-To"),
            lines: raw("Lines").and_then(|l| l.parse().ok()),
        }
    }
}

fn addresses(addr: &mail_parser::Address<'_>) -> Vec<Address> {
    addr.iter()
        .map(|a| Address {
            name: a.name().map(|n| n.to_string()),
            email: a.address().map(|e| e.to_string()),
        })
        .collect()
}

fn text_list(hv: &HeaderValue<'_>) -> Vec<String> {
    match hv {
        HeaderValue::Text(s) => vec![s.to_string()],
        HeaderValue::TextList(list) => list.iter().map(|s| s.to_string()).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields() {
        let headers = b"Date: Wed, 17 Jul 1996 02:23:25 -0700\r\n\
                        From: Terry Gray <gray@cac.washington.edu>\r\n\
                        To: imap@cac.washington.edu\r\n\
                        Subject: IMAP4rev1 WG mtg summary and minutes\r\n\
                        Message-ID: <B27397-0100000@cac.washington.edu>\r\n\
                        References: <a@example.com> <b@example.com>\r\n\
                        X-Label: work\r\n\
                        Lines: 42\r\n\
                        \r\n";
        let env = Envelope::parse(headers);
        assert_eq!(env.subject.as_deref(), Some("IMAP4rev1 WG mtg summary and minutes"));
        assert_eq!(env.message_id.as_deref(), Some("B27397-0100000@cac.washington.edu"));
        assert_eq!(env.from[0].name.as_deref(), Some("Terry Gray"));
        assert_eq!(env.from[0].email.as_deref(), Some("gray@cac.washington.edu"));
        assert_eq!(env.to.len(), 1);
        assert_eq!(env.references.len(), 2);
        assert_eq!(env.x_label.as_deref(), Some("work"));
        assert_eq!(env.lines, Some(42));
        assert!(env.date.is_some());
    }
}
