//! Scenario axes and the scenario tuple.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::matrix::Suite;

macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name { $($variant,)+ }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self { $(Self::$variant => $text,)+ }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|v| v.as_str() == name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

named_enum! {
    /// Interception behavior the subject is configured with.
    pub enum Behavior {
        Default => "default",
        BufferRequestDefault => "buffer_request_default",
        RequestPreBodyGeneratesResponseWithBody => "request_pre_body_generates_response_with_body",
        RequestPreBodyGeneratesResponseWithoutBody => "request_pre_body_generates_response_without_body",
        RequestBodyLastGeneratesResponseWithBody => "request_body_last_generates_response_with_body",
        RequestBodyLastGeneratesResponseWithoutBody => "request_body_last_generates_response_without_body",
        ResponsePreBodyGeneratesResponseWithBody => "response_pre_body_generates_response_with_body",
        ResponsePreBodyGeneratesResponseWithoutBody => "response_pre_body_generates_response_without_body",
        BufferRequestResponsePreBodyGeneratesResponseWithBody => "buffer_request_response_pre_body_generates_response_with_body",
        BufferRequestResponsePreBodyGeneratesResponseWithoutBody => "buffer_request_response_pre_body_generates_response_without_body",
        ResponsePreBodyPrepend => "response_pre_body_prepend",
        ResponseBodyPrepend => "response_body_prepend",
        ResponseBodyAppend => "response_body_append",
        BufferRequestResponsePreBodyPrepend => "buffer_request_response_pre_body_prepend",
        BufferRequestResponseBodyPrepend => "buffer_request_response_body_prepend",
        BufferRequestResponseBodyAppend => "buffer_request_response_body_append",
        RequestPreBodyGenerates404ResponseWithBody => "request_pre_body_generates_404_response_with_body",
        RequestPreBodyGenerates404ResponseWithoutBody => "request_pre_body_generates_404_response_without_body",
    }
}

impl Behavior {
    /// The subject answers during `request_pre_body`.
    pub fn generates_at_request_pre_body(self) -> bool {
        self.as_str().starts_with("request_pre_body_generates_")
    }

    /// The subject answers once the request body is complete.
    pub fn generates_at_request_body_last(self) -> bool {
        self.as_str().starts_with("request_body_last_generates_")
    }

    /// The subject answers without ever contacting the origin.
    pub fn short_circuits(self) -> bool {
        self.generates_at_request_pre_body() || self.generates_at_request_body_last()
    }

    pub fn reaches_origin(self) -> bool {
        !self.short_circuits()
    }

    pub fn buffers_request(self) -> bool {
        self.as_str().starts_with("buffer_request_")
    }

    /// The subject replaces the origin's response when its head arrives.
    pub fn generates_at_response_pre_body(self) -> bool {
        self.as_str().contains("response_pre_body_generates_")
    }

    pub fn generates_404(self) -> bool {
        matches!(
            self,
            Self::RequestPreBodyGenerates404ResponseWithBody
                | Self::RequestPreBodyGenerates404ResponseWithoutBody
        )
    }

    /// Any behavior that produces its own response.
    pub fn synthesizes_response(self) -> bool {
        self.short_circuits() || self.generates_at_response_pre_body()
    }

    /// Synthesized response carries `<h1>{behavior}</h1>` as its body.
    pub fn synthesizes_body(self) -> bool {
        self.synthesizes_response() && self.as_str().ends_with("_with_body")
    }

    pub fn prepends(self) -> bool {
        let name = self.as_str();
        name.ends_with("response_pre_body_prepend") || name.ends_with("response_body_prepend")
    }

    pub fn appends(self) -> bool {
        self.as_str().ends_with("response_body_append")
    }
}

named_enum! {
    /// How the test client writes a request onto the socket.
    pub enum SendMode {
        Immediate => "immediately",
        Collect => "collect",
    }
}

named_enum! {
    pub enum Method {
        Head => "HEAD",
        Get => "GET",
        Post => "POST",
    }
}

impl Method {
    pub fn has_request_body(self) -> bool {
        self == Self::Post
    }
}

named_enum! {
    /// Origin route, selected by the first path segment.
    pub enum PathSuffix {
        Body200Length => "body_200_length",
        Body200NoLength => "body_200_no_length",
        Body200Chunked => "body_200_chunked",
        Body200ChunkedPaddedLength => "body_200_chunked_padded_length",
        NoBody200Length => "no_body_200_length",
        NoBody200NoLength => "no_body_200_no_length",
        RejectContinueBody => "reject_continue_body",
        RejectContinueNoBody => "reject_continue_no_body",
        CloseAfterResponse => "close_after_response",
    }
}

impl PathSuffix {
    /// Request path, e.g. `/body_200_length/`.
    pub fn path(self) -> String {
        format!("/{}/", self.as_str())
    }

    pub fn has_body(self) -> bool {
        !self.as_str().starts_with("no_body_")
    }

    pub fn rejects_continue(self) -> bool {
        matches!(self, Self::RejectContinueBody | Self::RejectContinueNoBody)
    }
}

/// One entry of the scenario matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scenario {
    pub suite: Suite,
    pub behavior: Behavior,
    pub send_mode: SendMode,
    pub method: Method,
    pub suffix: PathSuffix,
}

impl Scenario {
    /// `suite.behavior.send_mode.METHOD.suffix`
    pub fn name(&self) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            self.suite, self.behavior, self.send_mode, self.method, self.suffix
        )
    }

    /// Inverse of [`Scenario::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        let mut parts = name.split('.');
        let scenario = Self {
            suite: Suite::from_name(parts.next()?)?,
            behavior: Behavior::from_name(parts.next()?)?,
            send_mode: SendMode::from_name(parts.next()?)?,
            method: Method::from_name(parts.next()?)?,
            suffix: PathSuffix::from_name(parts.next()?)?,
        };
        parts.next().is_none().then_some(scenario)
    }

    /// Seed for this scenario's random choices, stable across runs.
    pub fn seed(&self, base: u64) -> u64 {
        // FNV-1a over the name.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.name().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash ^ base
    }

    /// Request body size for this scenario; zero for bodiless methods.
    ///
    /// Small sizes are picked half of the time so the edge cases around an
    /// empty or one-byte body stay covered.
    pub fn request_body_len(&self, base_seed: u64) -> usize {
        if !self.method.has_request_body() {
            return 0;
        }
        let mut rng = StdRng::seed_from_u64(self.seed(base_seed));
        let (small, large) = if self.suite == Suite::Continue {
            (1..=2, 3..=100_000)
        } else {
            (0..=1, 2..=100_000)
        };
        if rng.gen_bool(0.5) {
            rng.gen_range(small)
        } else {
            rng.gen_range(large)
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
