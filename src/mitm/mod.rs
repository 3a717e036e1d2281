//! L4 Puppeteer's addon half (§4.8, §9): the TLS-terminating proxy that
//! intercepts outbound LLM API traffic from session containers once
//! [`crate::layers::l4_puppeteer`] has enrolled them. Split into the
//! request/response schema dialects ([`schema`]), the mode-aware
//! processing pipeline ([`pipeline`]), the certificate authority
//! ([`ca`]), and the network server itself ([`proxy`]).

pub mod ca;
pub mod pipeline;
pub mod proxy;
pub mod schema;
