//! Route templates: the bucket identity a request is assigned before any
//! response has been seen for it (§3's "synthetic key").
//!
//! Two requests share a bucket iff their templates and major params are
//! equal. Major params (`guild_id`, `channel_id`, `webhook_id`+`webhook_token`)
//! are preserved verbatim in the template; every other ID-shaped path segment
//! is collapsed to a placeholder so, e.g., `GET /channels/1/messages/2` and
//! `GET /channels/1/messages/3` land in the same bucket while
//! `GET /channels/1/messages/2` and `GET /channels/9/messages/2` do not.

use hyper::Method;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// The major-parameter identity of a request, distinguishing buckets that
/// would otherwise collapse to the same templated path.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum MajorParams {
    None,
    Guild(u64),
    Channel(u64),
    Webhook { webhook_id: u64, token: String },
}

impl Display for MajorParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::None => f.write_str("-"),
            Self::Guild(id) => write!(f, "guild:{id}"),
            Self::Channel(id) => write!(f, "channel:{id}"),
            Self::Webhook { webhook_id, token } => write!(f, "webhook:{webhook_id}:{token}"),
        }
    }
}

/// A request's path with every non-major ID-shaped segment replaced by a
/// placeholder, paired with its major params.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RouteTemplate {
    method: Method,
    template: String,
    major_params: MajorParams,
}

impl RouteTemplate {
    /// Derive a route template from a method and the request's already-split
    /// path segments plus an explicit major-param classification.
    ///
    /// The major params are passed in rather than sniffed from `segments`
    /// because only the caller (who built the path from typed IDs) reliably
    /// knows which segments are major and which are merely ID-shaped; blind
    /// pattern matching on the string risks misclassifying, e.g., a message
    /// ID that happens to sit where a guild ID usually would.
    #[must_use]
    pub fn new(method: Method, segments: &[Segment<'_>], major_params: MajorParams) -> Self {
        let mut template = String::new();

        for segment in segments {
            template.push('/');

            match segment {
                Segment::Literal(text) => template.push_str(text),
                Segment::Major(text) => template.push_str(text),
                Segment::Id(_) => template.push_str("{id}"),
            }
        }

        Self {
            method,
            template,
            major_params,
        }
    }

    /// The synthetic bucket key: `"{METHOD} {template} {major_params}"`.
    #[must_use]
    pub fn bucket_key(&self) -> String {
        format!("{} {} {}", self.method, self.template, self.major_params)
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    #[must_use]
    pub const fn major_params(&self) -> &MajorParams {
        &self.major_params
    }
}

/// One segment of a request path, classified by the caller building it.
#[derive(Clone, Copy, Debug)]
pub enum Segment<'a> {
    /// A fixed path component, e.g. `"messages"`.
    Literal(&'a str),
    /// A major parameter, preserved verbatim in the template.
    Major(&'a str),
    /// A non-major ID-shaped segment, collapsed to a placeholder.
    Id(u64),
}

#[cfg(test)]
mod tests {
    use super::{MajorParams, RouteTemplate, Segment};
    use hyper::Method;

    #[test]
    fn two_messages_in_same_channel_share_a_bucket() {
        let a = RouteTemplate::new(
            Method::GET,
            &[
                Segment::Literal("channels"),
                Segment::Major("123"),
                Segment::Literal("messages"),
                Segment::Id(1),
            ],
            MajorParams::Channel(123),
        );
        let b = RouteTemplate::new(
            Method::GET,
            &[
                Segment::Literal("channels"),
                Segment::Major("123"),
                Segment::Literal("messages"),
                Segment::Id(2),
            ],
            MajorParams::Channel(123),
        );

        assert_eq!(a.bucket_key(), b.bucket_key());
    }

    #[test]
    fn different_channels_do_not_share_a_bucket() {
        let a = RouteTemplate::new(
            Method::GET,
            &[
                Segment::Literal("channels"),
                Segment::Major("123"),
                Segment::Literal("messages"),
            ],
            MajorParams::Channel(123),
        );
        let b = RouteTemplate::new(
            Method::GET,
            &[
                Segment::Literal("channels"),
                Segment::Major("456"),
                Segment::Literal("messages"),
            ],
            MajorParams::Channel(456),
        );

        assert_ne!(a.bucket_key(), b.bucket_key());
    }

    #[test]
    fn template_collapses_non_major_ids() {
        let route = RouteTemplate::new(
            Method::GET,
            &[
                Segment::Literal("channels"),
                Segment::Major("123"),
                Segment::Literal("messages"),
                Segment::Id(999),
            ],
            MajorParams::Channel(123),
        );

        assert_eq!(route.template(), "/channels/123/messages/{id}");
    }
}
