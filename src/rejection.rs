// Copyright 2024 The amqp-courier Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Structured causes for rejected deliveries.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^at\s+(?P<method>.+?)(?:\s+in\s+(?P<file>.+):line\s+(?P<line>\d+))?$").unwrap()
});

/// Why a delivery was rejected.
///
/// Persisted into the stored document of an offloaded message when its
/// handler fails, so operators can inspect the cause next to the original
/// payload. Handlers can return one directly, bubble any
/// [`std::error::Error`] up with `?`, or build one from a bare message:
///
/// ```
/// use amqp_courier::RejectionReason;
///
/// let reason = RejectionReason::from("malformed invoice");
/// assert_eq!(reason.message, "malformed invoice");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionReason {
    /// Type of the failure value, when one was captured.
    #[serde(default)]
    pub type_name: Option<String>,
    pub message: String,
    /// Cause chain, outermost first.
    #[serde(default)]
    pub inner: Option<Box<RejectionReason>>,
    #[serde(default)]
    pub trace: Vec<TraceFrame>,
}

/// One parsed stack frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFrame {
    /// The trimmed source line the frame was parsed from.
    pub source: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    pub method: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

impl RejectionReason {
    /// A reason carrying only a message.
    pub fn from_message(message: impl Into<String>) -> RejectionReason {
        RejectionReason {
            type_name: None,
            message: message.into(),
            inner: None,
            trace: Vec::new(),
        }
    }

    /// A reason tagged with an explicit failure type name.
    pub fn of_type(type_name: impl Into<String>, message: impl Into<String>) -> RejectionReason {
        RejectionReason {
            type_name: Some(type_name.into()),
            ..RejectionReason::from_message(message)
        }
    }

    /// Captures a failure value: its type name, message, and cause chain.
    pub fn from_failure<E>(failure: &E) -> RejectionReason
    where
        E: std::error::Error + ?Sized,
    {
        RejectionReason {
            type_name: Some(std::any::type_name::<E>().to_string()),
            message: failure.to_string(),
            inner: failure.source().map(|source| Box::new(from_source(source))),
            trace: Vec::new(),
        }
    }

    /// Replaces the trace with frames parsed from `text`.
    ///
    /// Each trimmed line is matched against
    /// `at <method>[ in <file>:line <line>]`; lines without a method are
    /// dropped.
    pub fn with_trace_text(mut self, text: &str) -> RejectionReason {
        self.trace = parse_trace(text);
        self
    }

    /// Recursively drops all trace frames, here and along the cause chain.
    ///
    /// Used when the reason travels through a medium that cannot afford the
    /// frames.
    pub fn clear_trace(&mut self) {
        self.trace.clear();
        if let Some(inner) = self.inner.as_mut() {
            inner.clear_trace();
        }
    }
}

fn from_source(source: &(dyn std::error::Error + 'static)) -> RejectionReason {
    RejectionReason {
        type_name: None,
        message: source.to_string(),
        inner: source.source().map(|next| Box::new(from_source(next))),
        trace: Vec::new(),
    }
}

pub(crate) fn parse_trace(text: &str) -> Vec<TraceFrame> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let captures = FRAME_RE.captures(line)?;
            let qualified = captures.name("method")?.as_str();

            // `Namespace.Class.Method(args)` splits on the dots before the
            // argument list; an unqualified name keeps namespace and class
            // empty.
            let name_end = qualified.find('(').unwrap_or(qualified.len());
            let mut segments: Vec<&str> = qualified[..name_end].split('.').collect();
            let method_name = segments.pop().unwrap_or_default();
            if method_name.is_empty() {
                return None;
            }
            let method = format!("{}{}", method_name, &qualified[name_end..]);
            let class = segments.pop().map(str::to_string);
            let namespace = if segments.is_empty() {
                None
            } else {
                Some(segments.join("."))
            };

            Some(TraceFrame {
                source: line.to_string(),
                namespace,
                class,
                method,
                file: captures.name("file").map(|m| m.as_str().to_string()),
                line: captures
                    .name("line")
                    .and_then(|m| m.as_str().parse().ok()),
            })
        })
        .collect()
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(type_name) => write!(f, "{}: {}", type_name, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<String> for RejectionReason {
    fn from(message: String) -> RejectionReason {
        RejectionReason::from_message(message)
    }
}

impl From<&str> for RejectionReason {
    fn from(message: &str) -> RejectionReason {
        RejectionReason::from_message(message)
    }
}

impl<E: std::error::Error> From<E> for RejectionReason {
    fn from(failure: E) -> RejectionReason {
        RejectionReason::from_failure(&failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frames_with_and_without_location() {
        let trace = parse_trace(
            "  at Billing.Invoices.Parse(String raw) in /srv/app/Parser.cs:line 42\n\
             random noise\n\
             at main\n\
             at \n",
        );
        assert_eq!(trace.len(), 2);

        assert_eq!(trace[0].method, "Parse(String raw)");
        assert_eq!(trace[0].class.as_deref(), Some("Invoices"));
        assert_eq!(trace[0].namespace.as_deref(), Some("Billing"));
        assert_eq!(trace[0].file.as_deref(), Some("/srv/app/Parser.cs"));
        assert_eq!(trace[0].line, Some(42));

        assert_eq!(trace[1].method, "main");
        assert_eq!(trace[1].class, None);
        assert_eq!(trace[1].namespace, None);
        assert_eq!(trace[1].file, None);
    }

    #[test]
    fn implicit_from_message() {
        let reason: RejectionReason = "boom".into();
        assert_eq!(reason.message, "boom");
        assert!(reason.type_name.is_none());
    }

    #[test]
    fn implicit_from_failure_captures_type_and_causes() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let reason: RejectionReason = io.into();
        assert_eq!(reason.message, "disk on fire");
        assert!(reason.type_name.as_deref().unwrap().contains("io::Error"));
    }

    #[test]
    fn clear_trace_recurses_into_inner() {
        let mut reason = RejectionReason::from_message("outer")
            .with_trace_text("at Outer.Run in a.cs:line 1");
        reason.inner = Some(Box::new(
            RejectionReason::from_message("inner").with_trace_text("at Inner.Run in b.cs:line 2"),
        ));

        reason.clear_trace();
        assert!(reason.trace.is_empty());
        assert!(reason.inner.as_ref().unwrap().trace.is_empty());
    }

    #[test]
    fn survives_serde_round_trip() {
        let reason = RejectionReason::of_type("ParseError", "bad input")
            .with_trace_text("at App.Handle(Message m) in app.cs:line 7");
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("\"typeName\""));
        let back: RejectionReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reason);
    }
}
