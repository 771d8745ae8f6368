use std::fmt::{self, Write as _};

use nu_ansi_term::Color;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::{Event, Level, Subscriber, field, span};
use tracing_subscriber::field::{RecordFields, VisitFmt, VisitOutput};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

const TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond digits:3]");

/// Single line human format: `time LEVEL target: message key=value ...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TernFormat;

impl<S, N> FormatEvent<S, N> for TernFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let ansi = writer.has_ansi_escapes();

        match time::OffsetDateTime::now_utc().format(TIME_FORMAT) {
            Ok(now) if ansi => write!(writer, "{}", Color::DarkGray.paint(now))?,
            Ok(now) => write!(writer, "{now}")?,
            Err(_) => write!(writer, "--:--:--.---")?,
        }

        write!(writer, " {} ", FmtLevel::new(meta.level(), ansi))?;

        if ansi {
            write!(writer, "{}: ", Color::DarkGray.paint(meta.target()))?;
        } else {
            write!(writer, "{}: ", meta.target())?;
        }

        ctx.format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

impl<'w> FormatFields<'w> for TernFormat {
    fn format_fields<R: RecordFields>(&self, writer: Writer<'w>, fields: R) -> fmt::Result {
        let mut visitor = FieldVisitor::new(writer, true);
        fields.record(&mut visitor);
        visitor.finish()
    }

    fn add_fields(
        &self,
        current: &'w mut FormattedFields<Self>,
        fields: &span::Record<'_>,
    ) -> fmt::Result {
        let empty = current.is_empty();
        let mut visitor = FieldVisitor::new(current.as_writer(), empty);
        fields.record(&mut visitor);
        visitor.finish()
    }
}

/// Buffers the message so it is always printed ahead of the other fields,
/// whatever order the macro recorded them in.
struct FieldVisitor<'a> {
    writer: Writer<'a>,
    is_empty: bool,
    message: Option<String>,
    fields: String,
}

impl<'a> FieldVisitor<'a> {
    fn new(writer: Writer<'a>, is_empty: bool) -> Self {
        Self {
            writer,
            is_empty,
            message: None,
            fields: String::new(),
        }
    }

    fn push_field(&mut self, name: &str, value: String) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }

        let color = match name {
            "error" | "err" => Color::Red,
            _ => Color::Blue,
        };

        // Writing into a String never fails.
        let _ = if self.writer.has_ansi_escapes() {
            write!(self.fields, "{}={}", name, color.paint(value))
        } else {
            write!(self.fields, "{name}={value}")
        };
    }
}

impl field::Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push_field(field.name(), format!("{value:?}"));
        }
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.push_field(field.name(), format!("{value:?}"));
        }
    }
}

impl VisitOutput<fmt::Result> for FieldVisitor<'_> {
    fn finish(mut self) -> fmt::Result {
        let mut separator = if self.is_empty { "" } else { " " };

        if let Some(message) = self.message.take() {
            write!(self.writer, "{separator}{message}")?;
            separator = " ";
        }

        if !self.fields.is_empty() {
            write!(self.writer, "{separator}{}", self.fields)?;
        }

        Ok(())
    }
}

impl VisitFmt for FieldVisitor<'_> {
    fn writer(&mut self) -> &mut dyn fmt::Write {
        &mut self.writer
    }
}

struct FmtLevel<'a> {
    level: &'a Level,
    ansi: bool,
}

impl<'a> FmtLevel<'a> {
    fn new(level: &'a Level, ansi: bool) -> Self {
        Self { level, ansi }
    }
}

impl fmt::Display for FmtLevel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, color) = match *self.level {
            Level::TRACE => ("TRACE", Color::Purple),
            Level::DEBUG => ("DEBUG", Color::Blue),
            Level::INFO => (" INFO", Color::Green),
            Level::WARN => (" WARN", Color::Yellow),
            Level::ERROR => ("ERROR", Color::Red),
        };

        if self.ansi {
            write!(f, "{}", color.paint(label))
        } else {
            f.write_str(label)
        }
    }
}
