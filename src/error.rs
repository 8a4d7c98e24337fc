use miette::{Diagnostic, SourceSpan};
use std::{
    error::Error,
    fmt::{Display, Formatter, Result},
};

#[derive(Debug, Diagnostic)]
pub enum WireError {
    /// The engine reported a runtime error through the `error` message.
    #[diagnostic(code(oxiwire::engine), url(docsrs))]
    Engine { msg: String },

    /// One side broke the turn-taking rules of the status channel.
    #[diagnostic(
        code(oxiwire::protocol),
        url(docsrs),
        help("the session must be aborted, shared state can no longer be trusted")
    )]
    Protocol {
        #[source_code]
        src: String,
        #[label("protocol violated here")]
        err_span: SourceSpan,
        msg: String,
    },

    #[diagnostic(code(oxiwire::resource), url(docsrs))]
    Resource { msg: String },

    #[diagnostic(code(oxiwire::encoding), url(docsrs))]
    Encoding {
        #[source_code]
        src: String,
        #[label("cannot be encoded inline")]
        err_span: SourceSpan,
        msg: String,
    },

    #[diagnostic(code(oxiwire::channel), url(docsrs))]
    ChannelClosed {
        #[source_code]
        src: String,
        #[label("channel closed")]
        err_span: SourceSpan,
    },

    #[diagnostic(code(oxiwire::abnormal_exit), url(docsrs))]
    AbnormalExit { msg: String },
}

pub type WireResult<T> = miette::Result<T>;

impl Display for WireError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            WireError::Engine { msg } => write!(f, "Engine error: {}", msg),
            WireError::Protocol { msg, .. } => write!(f, "Protocol violation: {}", msg),
            WireError::Resource { msg } => write!(f, "Resource unavailable: {}", msg),
            WireError::Encoding { msg, .. } => write!(f, "Encoding error: {}", msg),
            WireError::ChannelClosed { src, .. } => write!(f, "Channel closed: {}", src),
            WireError::AbnormalExit { msg } => write!(f, "Abnormal exit: {}", msg),
        }
    }
}

impl Error for WireError {}

impl WireError {
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine { msg: msg.into() }
    }

    pub fn protocol(
        src: impl Into<String>,
        err_span: impl Into<SourceSpan>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            src: src.into(),
            err_span: err_span.into(),
            msg: msg.into(),
        }
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource { msg: msg.into() }
    }

    pub fn encoding(
        src: impl Into<String>,
        err_span: impl Into<SourceSpan>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Encoding {
            src: src.into(),
            err_span: err_span.into(),
            msg: msg.into(),
        }
    }

    pub fn channel_closed(src: impl Into<String>, err_span: impl Into<SourceSpan>) -> Self {
        Self::ChannelClosed {
            src: src.into(),
            err_span: err_span.into(),
        }
    }

    pub fn abnormal_exit(msg: impl Into<String>) -> Self {
        Self::AbnormalExit { msg: msg.into() }
    }

    /// Whether this error must end the session.
    ///
    /// Resource failures and encoding rejections are reported to the caller
    /// and leave the channel untouched; everything else is terminal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            WireError::Resource { .. } | WireError::Encoding { .. }
        )
    }
}

/// Finds the [`WireError`] inside a report, if the report wraps one.
pub fn wire_error(report: &miette::Report) -> Option<&WireError> {
    report.downcast_ref::<WireError>()
}
