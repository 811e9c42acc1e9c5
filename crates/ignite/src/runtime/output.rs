//! Shared console output: one lock, whole lines, colored program tags

use std::io::Write;
use std::sync::Mutex;

const RESET_SEQ: &str = "\x1b[0m";
const BOLD_SEQ: &str = "\x1b[1m";

/// Width the program identifier is padded to inside its tag
pub const TAG_WIDTH: usize = 20;

/// ANSI terminal colors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    LightBlack,
    LightRed,
    LightGreen,
    LightYellow,
    LightBlue,
    LightMagenta,
    LightCyan,
    LightWhite,
}

impl Color {
    /// SGR foreground code
    pub fn code(self) -> u8 {
        match self {
            Color::Black => 30,
            Color::Red => 31,
            Color::Green => 32,
            Color::Yellow => 33,
            Color::Blue => 34,
            Color::Magenta => 35,
            Color::Cyan => 36,
            Color::White => 37,
            Color::LightBlack => 90,
            Color::LightRed => 91,
            Color::LightGreen => 92,
            Color::LightYellow => 93,
            Color::LightBlue => 94,
            Color::LightMagenta => 95,
            Color::LightCyan => 96,
            Color::LightWhite => 97,
        }
    }
}

/// Hands out program colors round-robin.
///
/// Red and black are reserved for group announcements and never handed out.
#[derive(Debug, Default)]
pub struct ColorAllocator {
    next: usize,
}

impl ColorAllocator {
    const POOL: [Color; 14] = [
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Magenta,
        Color::Cyan,
        Color::White,
        Color::LightBlack,
        Color::LightRed,
        Color::LightGreen,
        Color::LightYellow,
        Color::LightBlue,
        Color::LightMagenta,
        Color::LightCyan,
        Color::LightWhite,
    ];

    pub fn new() -> Self {
        Self::default()
    }

    /// Next color in the pool, wrapping around
    pub fn allocate(&mut self) -> Color {
        let color = Self::POOL[self.next % Self::POOL.len()];
        self.next += 1;
        color
    }
}

/// Serializes lines from all programs onto one stream
pub struct Output {
    sink: Mutex<Box<dyn Write + Send>>,
    colored: bool,
}

impl Output {
    /// Output to the process stdout
    pub fn stdout(colored: bool) -> Self {
        Self::new(std::io::stdout(), colored)
    }

    /// Output to an arbitrary writer
    pub fn new(sink: impl Write + Send + 'static, colored: bool) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
            colored,
        }
    }

    /// Write one line prefixed with a program tag.
    ///
    /// A trailing newline in `line` is replaced, so every call emits exactly
    /// one terminated line.
    pub fn line(&self, identifier: &str, color: Color, line: &str) {
        let line = line.trim_end_matches(['\n', '\r']);
        let tag = format!("[{:<width$}]: ", identifier, width = TAG_WIDTH);

        let mut buffer = String::with_capacity(tag.len() + line.len() + 16);
        if self.colored {
            buffer.push_str(&format!("\x1b[{}m{}{}", color.code(), tag, RESET_SEQ));
        } else {
            buffer.push_str(&tag);
        }
        buffer.push_str(line);
        buffer.push('\n');

        self.write(buffer.as_bytes());
    }

    /// Write a bold red status line without a program tag
    pub fn banner(&self, message: &str) {
        let message = if self.colored {
            format!(
                "\x1b[{}m{}{}{}\n",
                Color::Red.code(),
                BOLD_SEQ,
                message,
                RESET_SEQ
            )
        } else {
            format!("{}\n", message)
        };

        self.write(message.as_bytes());
    }

    fn write(&self, bytes: &[u8]) {
        // A poisoned lock still guards a usable writer
        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Err(e) = sink.write_all(bytes).and_then(|_| sink.flush()) {
            log::debug!("Failed to write console output: {}", e);
        }
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("colored", &self.colored)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// In-memory writer shared between an `Output` and the test reading it
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        pub(crate) fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }
}
