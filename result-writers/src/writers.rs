// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Result writers, one per report format.
//!
//! Every writer implements [`ResultWriter`]: it consumes [`TestMessage`]s one at a time, builds its
//! report in memory, and writes it to its output exactly once, when it's disposed. Writers for
//! files on disk are created through [`ResultFormat::create_writer`], and [`ResultWriters`] fans a
//! single message stream out to several writers.

mod ctrf;
mod html;
mod junit;
mod nunit;
mod trx;
mod xml_v1;
mod xml_v2;

pub use ctrf::CtrfWriter;
pub use html::HtmlWriter;
pub use junit::JunitWriter;
pub use nunit::NunitWriter;
pub use trx::TrxWriter;
pub use xml_v1::XmlV1Writer;
pub use xml_v2::XmlV2Writer;

use crate::{
    attachments::AttachmentMaterializer,
    config::ResultWriterConfig,
    environment::HostIdentity,
    errors::{DisplayErrorChain, ResultFormatParseError, WriteError},
    fs::{FileSystem, RealFileSystem},
    messages::TestMessage,
    platform::HostPlatform,
};
use camino::Utf8Path;
use debug_ignore::DebugIgnore;
use report_xml::XmlElement;
use serde::Serialize;
use std::{
    fmt,
    fs::File,
    io::{self, BufWriter},
    str::FromStr,
    sync::Arc,
};
use tracing::{debug, warn};

/// A consumer of test lifecycle messages that renders a report.
pub trait ResultWriter {
    /// Handles a single message.
    ///
    /// Always returns true: writers are interested in every message, and failures reported by
    /// tests are data rather than errors.
    fn handle_message(&mut self, message: &TestMessage) -> bool;

    /// Renders the report, writes it to the output, and flushes the output.
    ///
    /// The report is written at most once. Calling this again is a no-op that returns `Ok(())`.
    fn dispose(&mut self) -> Result<(), WriteError>;
}

/// A report format.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResultFormat {
    /// Common Test Report Format (JSON).
    Ctrf,
    /// A self-contained HTML page.
    Html,
    /// JUnit XML.
    Junit,
    /// NUnit 3 XML.
    Nunit,
    /// Visual Studio TRX.
    Trx,
    /// xUnit.net v2+ XML.
    XmlV2,
    /// xUnit.net v1 XML.
    XmlV1,
}

impl ResultFormat {
    /// String representations of all known formats.
    pub fn variants() -> &'static [&'static str] {
        &["ctrf", "html", "junit", "nunit", "trx", "xml", "xmlv1"]
    }

    /// Creates a writer that writes the report to a file, creating parent directories as needed.
    ///
    /// The file is created immediately and written when the writer is disposed.
    pub fn create_writer(
        self,
        path: &Utf8Path,
        context: WriterContext,
    ) -> Result<Box<dyn ResultWriter + Send>, WriteError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|error| WriteError::Fs {
                file: parent.to_owned(),
                error,
            })?;
        }

        let file = File::create(path).map_err(|error| WriteError::Fs {
            file: path.to_owned(),
            error,
        })?;
        debug!("created {self} report at {path}");
        Ok(self.writer_for(BufWriter::new(file), context))
    }

    /// Creates a writer for an arbitrary output.
    pub fn writer_for<W>(self, output: W, context: WriterContext) -> Box<dyn ResultWriter + Send>
    where
        W: io::Write + Send + 'static,
    {
        match self {
            Self::Ctrf => Box::new(CtrfWriter::new(output, context)),
            Self::Html => Box::new(HtmlWriter::new(output, context)),
            Self::Junit => Box::new(JunitWriter::new(output, context)),
            Self::Nunit => Box::new(NunitWriter::new(output, context)),
            Self::Trx => Box::new(TrxWriter::new(output, context)),
            Self::XmlV2 => Box::new(XmlV2Writer::new(output, context)),
            Self::XmlV1 => Box::new(XmlV1Writer::new(output, context)),
        }
    }
}

impl FromStr for ResultFormat {
    type Err = ResultFormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let val = match s.to_ascii_lowercase().as_str() {
            "ctrf" => Self::Ctrf,
            "html" => Self::Html,
            "junit" => Self::Junit,
            "nunit" => Self::Nunit,
            "trx" => Self::Trx,
            "xml" => Self::XmlV2,
            "xmlv1" => Self::XmlV1,
            _ => {
                return Err(ResultFormatParseError {
                    input: s.to_owned(),
                });
            }
        };
        Ok(val)
    }
}

impl fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ctrf => write!(f, "ctrf"),
            Self::Html => write!(f, "html"),
            Self::Junit => write!(f, "junit"),
            Self::Nunit => write!(f, "nunit"),
            Self::Trx => write!(f, "trx"),
            Self::XmlV2 => write!(f, "xml"),
            Self::XmlV1 => write!(f, "xmlv1"),
        }
    }
}

/// Everything a writer needs to know about its surroundings.
#[derive(Clone, Debug)]
pub struct WriterContext {
    config: ResultWriterConfig,
    host: HostIdentity,
    platform: HostPlatform,
    fs: DebugIgnore<Arc<dyn FileSystem>>,
}

impl WriterContext {
    /// Creates a new context.
    pub fn new(
        config: ResultWriterConfig,
        host: HostIdentity,
        platform: HostPlatform,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            config,
            host,
            platform,
            fs: DebugIgnore(fs),
        }
    }

    /// Creates a context for the current process: identity from the process environment, the
    /// detected host platform, and the real file system.
    pub fn from_process(config: ResultWriterConfig) -> Self {
        Self::new(
            config,
            HostIdentity::from_process(),
            HostPlatform::current(),
            Arc::new(RealFileSystem),
        )
    }

    /// The writer configuration.
    pub fn config(&self) -> &ResultWriterConfig {
        &self.config
    }

    /// The host and user identity.
    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    /// The host platform.
    pub fn platform(&self) -> &HostPlatform {
        &self.platform
    }

    /// The file system attachments are written to.
    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Returns a materializer writing into the configured attachments directory.
    pub fn attachment_materializer(&self) -> AttachmentMaterializer {
        AttachmentMaterializer::new(self.fs.0.clone(), self.config.attachments_dir())
    }
}

/// A callback invoked with the rendered document once a writer has been disposed.
pub type OnDisposed = Box<dyn FnOnce(&[u8]) + Send>;

/// The output of a writer. Owns the output until the report is written.
pub(crate) struct ReportSink<W> {
    format: ResultFormat,
    output: Option<W>,
    on_disposed: Option<DebugIgnore<OnDisposed>>,
    deferred_error: Option<WriteError>,
}

impl<W: io::Write> ReportSink<W> {
    pub(crate) fn new(format: ResultFormat, output: W) -> Self {
        Self {
            format,
            output: Some(output),
            on_disposed: None,
            deferred_error: None,
        }
    }

    pub(crate) fn set_on_disposed(&mut self, on_disposed: OnDisposed) {
        self.on_disposed = Some(DebugIgnore(on_disposed));
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.output.is_none()
    }

    /// Records a fault hit while handling a message. The first fault recorded is returned from
    /// [`Self::finish`] instead of writing the document.
    pub(crate) fn defer_error(&mut self, error: WriteError) {
        debug!(
            "deferring {} report error: {}",
            self.format,
            DisplayErrorChain::new(&error)
        );
        if self.deferred_error.is_none() {
            self.deferred_error = Some(error);
        }
    }

    /// Writes an XML document.
    pub(crate) fn finish_xml(
        &mut self,
        render: impl FnOnce() -> XmlElement,
    ) -> Result<(), WriteError> {
        let format = self.format;
        self.finish(|| {
            let mut buf = Vec::new();
            render()
                .serialize(&mut buf)
                .map_err(|error| WriteError::Xml {
                    format: format_name(format),
                    error,
                })?;
            Ok(buf)
        })
    }

    /// Writes a JSON document.
    pub(crate) fn finish_json<T: Serialize>(
        &mut self,
        render: impl FnOnce() -> T,
    ) -> Result<(), WriteError> {
        let format = self.format;
        self.finish(|| {
            serde_json::to_vec_pretty(&render()).map_err(|error| WriteError::Json {
                format: format_name(format),
                error,
            })
        })
    }

    /// Renders the document and writes it out, if that hasn't happened yet.
    ///
    /// The output is released even if rendering or writing fails, so the document is attempted
    /// exactly once. A deferred error is returned without rendering anything.
    pub(crate) fn finish(
        &mut self,
        render: impl FnOnce() -> Result<Vec<u8>, WriteError>,
    ) -> Result<(), WriteError> {
        let Some(mut output) = self.output.take() else {
            return Ok(());
        };
        if let Some(error) = self.deferred_error.take() {
            return Err(error);
        }

        let document = render()?;
        output.write_all(&document).map_err(WriteError::Io)?;
        output.flush().map_err(WriteError::Io)?;
        debug!(
            "wrote {} report ({} bytes)",
            self.format,
            document.len()
        );

        if let Some(on_disposed) = self.on_disposed.take() {
            (on_disposed.0)(&document);
        }
        Ok(())
    }
}

impl<W> fmt::Debug for ReportSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportSink")
            .field("format", &self.format)
            .field("disposed", &self.output.is_none())
            .field("deferred_error", &self.deferred_error)
            .finish()
    }
}

fn format_name(format: ResultFormat) -> &'static str {
    match format {
        ResultFormat::Ctrf => "CTRF",
        ResultFormat::Html => "HTML",
        ResultFormat::Junit => "JUnit",
        ResultFormat::Nunit => "NUnit",
        ResultFormat::Trx => "TRX",
        ResultFormat::XmlV2 => "xUnit v2",
        ResultFormat::XmlV1 => "xUnit v1",
    }
}

/// Disposes a writer that's being dropped, logging any failure.
pub(crate) fn dispose_on_drop(writer: &mut impl ResultWriter, format: ResultFormat) {
    if let Err(error) = writer.dispose() {
        warn!(
            "failed to write {format} report while dropping its writer: {}",
            DisplayErrorChain::new(&error)
        );
    }
}

/// Fans a single message stream out to several writers.
#[derive(Default)]
pub struct ResultWriters {
    writers: Vec<Box<dyn ResultWriter + Send>>,
}

impl ResultWriters {
    /// Creates an empty set of writers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a writer.
    pub fn push(&mut self, writer: Box<dyn ResultWriter + Send>) -> &mut Self {
        self.writers.push(writer);
        self
    }

    /// The number of writers.
    pub fn len(&self) -> usize {
        self.writers.len()
    }

    /// Returns true if there are no writers.
    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

impl fmt::Debug for ResultWriters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultWriters")
            .field("len", &self.writers.len())
            .finish()
    }
}

impl ResultWriter for ResultWriters {
    fn handle_message(&mut self, message: &TestMessage) -> bool {
        for writer in &mut self.writers {
            writer.handle_message(message);
        }
        true
    }

    /// Disposes every writer, even if some of them fail. Returns the first error.
    fn dispose(&mut self) -> Result<(), WriteError> {
        let mut first_error = None;
        for writer in &mut self.writers {
            if let Err(error) = writer.dispose() {
                if first_error.is_none() {
                    first_error = Some(error);
                } else {
                    warn!(
                        "additional error while disposing result writers: {}",
                        DisplayErrorChain::new(&error)
                    );
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use camino_tempfile::Utf8TempDir;
    use std::sync::Mutex;
    use test_case::test_case;

    #[test_case("ctrf", ResultFormat::Ctrf ; "ctrf")]
    #[test_case("html", ResultFormat::Html ; "html")]
    #[test_case("junit", ResultFormat::Junit ; "junit")]
    #[test_case("NUnit", ResultFormat::Nunit ; "nunit mixed case")]
    #[test_case("trx", ResultFormat::Trx ; "trx")]
    #[test_case("xml", ResultFormat::XmlV2 ; "xml")]
    #[test_case("xmlv1", ResultFormat::XmlV1 ; "xmlv1")]
    fn parse_format(input: &str, expected: ResultFormat) {
        let format: ResultFormat = input.parse().expect("format is known");
        assert_eq!(format, expected);
        assert_eq!(format.to_string(), input.to_ascii_lowercase());
        assert!(ResultFormat::variants().contains(&format.to_string().as_str()));
    }

    #[test]
    fn parse_unknown_format() {
        let error = "xunit".parse::<ResultFormat>().expect_err("format is unknown");
        assert_eq!(error.input, "xunit");
    }

    #[test]
    fn sink_writes_once() {
        let buffer = SharedBuffer::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sink = ReportSink::new(ResultFormat::Html, buffer.clone());
        let seen2 = seen.clone();
        sink.set_on_disposed(Box::new(move |document| {
            seen2
                .lock()
                .expect("lock not poisoned")
                .push(document.to_vec());
        }));

        sink.finish(|| Ok(b"first".to_vec())).expect("first write succeeds");
        sink.finish(|| panic!("second render must not happen"))
            .expect("second dispose is a no-op");

        assert!(sink.is_disposed());
        assert_eq!(buffer.contents(), "first");
        assert_eq!(*seen.lock().expect("lock not poisoned"), vec![b"first".to_vec()]);
    }

    #[test]
    fn sink_releases_output_on_error() {
        let mut sink = ReportSink::new(ResultFormat::Junit, FailingWriter);
        let error = sink
            .finish(|| Ok(b"document".to_vec()))
            .expect_err("writing fails");
        assert!(matches!(error, WriteError::Io(_)), "unexpected error: {error:?}");

        // The document is only attempted once.
        sink.finish(|| Ok(b"document".to_vec()))
            .expect("second dispose is a no-op");
    }

    #[test]
    fn every_format_writes_an_empty_document() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        for format in ResultFormat::variants() {
            let format: ResultFormat = format.parse().expect("variant parses");
            eprintln!("** testing: {format}");

            let path = dir.path().join("nested").join(format!("report.{format}"));
            let (context, _) = test_context();
            let mut writer = format
                .create_writer(&path, context)
                .expect("writer created");
            writer.dispose().expect("writer disposed");
            writer.dispose().expect("second dispose is a no-op");
            drop(writer);

            let contents = std::fs::read_to_string(&path).expect("report written");
            assert!(!contents.is_empty(), "{format} report is empty");
        }
    }

    #[test]
    fn multiplexer_feeds_every_writer() {
        let junit = SharedBuffer::default();
        let xml = SharedBuffer::default();
        let (context, _) = test_context();

        let mut writers = ResultWriters::new();
        writers
            .push(ResultFormat::Junit.writer_for(junit.clone(), context.clone()))
            .push(ResultFormat::XmlV2.writer_for(xml.clone(), context));
        assert_eq!(writers.len(), 2);

        run_writer(
            &mut writers,
            &[
                assembly_starting(),
                assembly_finished(default_summary()),
            ],
        );

        let junit = parse_xml(&junit);
        assert_eq!(junit.children_named("testsuite").count(), 1);
        let xml = parse_xml(&xml);
        assert_eq!(xml.children_named("assembly").count(), 1);
    }

    #[test]
    fn multiplexer_disposes_all_and_reports_first_error() {
        let buffer = SharedBuffer::default();
        let (context, _) = test_context();

        let mut writers = ResultWriters::new();
        writers
            .push(ResultFormat::Junit.writer_for(FailingWriter, context.clone()))
            .push(ResultFormat::Junit.writer_for(buffer.clone(), context));

        writers.dispose().expect_err("first writer fails");
        assert!(!buffer.contents().is_empty(), "second writer still wrote");
    }

    struct FailingWriter;

    impl io::Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
