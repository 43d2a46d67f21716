//! Generic WebSocket extension negotiation chain over the
//! `Sec-WebSocket-Extensions` header: four
//! `get_offer`/`negotiate_answer`/`negotiate_offer`/frame-transform hooks
//! exposed as plain trait methods, plus free functions for parameter-list
//! parsing.

use crate::ws::frame::{Opcode, Rsv};

/// One `;`-separated parameter of an extension offer/answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: Option<String>,
}

/// Split `parameters` into [`Param`]s, trimming whitespace and stripping
/// quotes around quoted values.
#[must_use]
pub fn parse_parameter_list(parameters: &str) -> Vec<Param> {
    parameters
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_key_value)
        .collect()
}

/// Split one `key` or `key=value` token.
#[must_use]
pub fn parse_key_value(token: &str) -> Param {
    match token.split_once('=') {
        None => Param { key: token.trim().to_owned(), value: None },
        Some((key, value)) => {
            let value = value.trim();
            let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
            Param { key: key.trim().to_owned(), value: Some(value.to_owned()) }
        }
    }
}

/// One extension entry in the `Sec-WebSocket-Extensions` header: a name
/// plus its parameter list (what's left after splitting the header value on
/// `,` and each entry on `;`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    pub name: String,
    pub params: Vec<Param>,
}

/// Split a full `Sec-WebSocket-Extensions` header value into its
/// comma-separated entries.
#[must_use]
pub fn parse_extensions_header(value: &str) -> Vec<ExtensionOffer> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let mut parts = entry.split(';');
            let name = parts.next().unwrap_or("").trim().to_owned();
            let params = parts.map(parse_key_value).collect();
            ExtensionOffer { name, params }
        })
        .collect()
}

/// One negotiated extension's transform hooks. An extension may
/// mutate `rsv` bits and payload bytes but must not change opcode or
/// fragmentation topology — callers enforce that invariant by only ever
/// passing the opcode through unchanged.
pub trait WsExtension: Send {
    fn name(&self) -> &str;

    /// Client-side: produce this extension's contribution to the outbound
    /// `Sec-WebSocket-Extensions` offer.
    fn get_offer(&self) -> String;

    /// Client-side: the server's answer for this extension arrived; adopt
    /// whatever parameters it settled on.
    fn negotiate_answer(&mut self, answer: &[Param]) -> crate::error::Result<()>;

    /// Server-side: given one client-offered entry for this extension,
    /// decide the server's answer (or decline by returning `None`).
    fn negotiate_offer(&mut self, offer: &[Param]) -> Option<String>;

    /// Transform an incoming frame's rsv bits/payload before it reaches the
    /// next extension in the chain (reverse declaration order) or the
    /// application.
    fn handle_incoming_frame(&mut self, opcode: Opcode, rsv: &mut Rsv, payload: &mut Vec<u8>);

    /// Transform an outgoing frame's rsv bits/payload (declaration order)
    /// before it reaches the wire.
    fn handle_outgoing_frame(&mut self, opcode: Opcode, rsv: &mut Rsv, payload: &mut Vec<u8>);
}

/// An ordered, negotiated chain of extensions.
#[derive(Default)]
pub struct ExtensionChain {
    extensions: Vec<Box<dyn WsExtension>>,
}

impl ExtensionChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ext: Box<dyn WsExtension>) {
        self.extensions.push(ext);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Build the client's combined offer header value, one comma-separated
    /// entry per installed extension.
    #[must_use]
    pub fn build_offer_header(&self) -> String {
        self.extensions.iter().map(|e| e.get_offer()).collect::<Vec<_>>().join(", ")
    }

    /// Client-side: dispatch the server's answer header to each matching
    /// installed extension by name.
    pub fn negotiate_answers(&mut self, header_value: &str) -> crate::error::Result<()> {
        let answers = parse_extensions_header(header_value);
        for ext in &mut self.extensions {
            if let Some(answer) = answers.iter().find(|a| a.name == ext.name()) {
                ext.negotiate_answer(&answer.params)?;
            }
        }
        Ok(())
    }

    /// Server-side: given the client's offer header, let each installed
    /// extension (in declaration order) negotiate its own answer; returns
    /// the combined answer header value.
    #[must_use]
    pub fn negotiate_offers(&mut self, header_value: &str) -> String {
        let offers = parse_extensions_header(header_value);
        let mut answers = Vec::new();
        for ext in &mut self.extensions {
            if let Some(offer) = offers.iter().find(|o| o.name == ext.name()) {
                if let Some(answer) = ext.negotiate_offer(&offer.params) {
                    answers.push(answer);
                }
            }
        }
        answers.join(", ")
    }

    /// `handle_incoming_frame`, reverse declaration order.
    pub fn apply_incoming(&mut self, opcode: Opcode, rsv: &mut Rsv, payload: &mut Vec<u8>) {
        for ext in self.extensions.iter_mut().rev() {
            ext.handle_incoming_frame(opcode, rsv, payload);
        }
    }

    /// `handle_outgoing_frame`, declaration order.
    pub fn apply_outgoing(&mut self, opcode: Opcode, rsv: &mut Rsv, payload: &mut Vec<u8>) {
        for ext in &mut self.extensions {
            ext.handle_outgoing_frame(opcode, rsv, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_key_and_key_value_tokens() {
        let params = parse_parameter_list("server_max_window_bits; client_max_window_bits=10");
        assert_eq!(
            params,
            vec![
                Param { key: "server_max_window_bits".into(), value: None },
                Param { key: "client_max_window_bits".into(), value: Some("10".into()) },
            ]
        );
    }

    #[test]
    fn strips_quotes_around_value() {
        let p = parse_key_value(r#"foo="bar""#);
        assert_eq!(p, Param { key: "foo".into(), value: Some("bar".into()) });
    }

    #[test]
    fn parses_multiple_extensions_in_header() {
        let exts = parse_extensions_header("permessage-deflate; client_max_window_bits, x-custom");
        assert_eq!(exts.len(), 2);
        assert_eq!(exts[0].name, "permessage-deflate");
        assert_eq!(exts[1].name, "x-custom");
        assert!(exts[1].params.is_empty());
    }

    struct Noop;
    impl WsExtension for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn get_offer(&self) -> String {
            "noop".into()
        }
        fn negotiate_answer(&mut self, _answer: &[Param]) -> crate::error::Result<()> {
            Ok(())
        }
        fn negotiate_offer(&mut self, _offer: &[Param]) -> Option<String> {
            Some("noop".into())
        }
        fn handle_incoming_frame(&mut self, _opcode: Opcode, _rsv: &mut Rsv, _payload: &mut Vec<u8>) {}
        fn handle_outgoing_frame(&mut self, _opcode: Opcode, _rsv: &mut Rsv, _payload: &mut Vec<u8>) {}
    }

    #[test]
    fn chain_negotiates_offer_and_builds_answer_header() {
        let mut chain = ExtensionChain::new();
        chain.push(Box::new(Noop));
        let answer = chain.negotiate_offers("noop");
        assert_eq!(answer, "noop");
    }
}
