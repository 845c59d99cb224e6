//! Streaming file reader with automatic gzip decompression
//!
//! This module provides utilities for reading files with automatic detection
//! and decompression of gzip-compressed files based on file extension.
//!
//! # Example
//!
//! ```rust,no_run
//! use logpi::file_reader;
//! use std::io::BufRead;
//!
//! // Automatically detects .gz and decompresses
//! let reader = file_reader::open("access.log.gz")?;
//!
//! for line in reader.lines() {
//!     let line = line?;
//!     println!("{}", line);
//! }
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! # Integration with the chunk reader
//!
//! The reader returns a `Box<dyn BufRead + Send>` that the pipeline's Reader
//! stage chunks directly, with no intermediate copy:
//!
//! ```rust,no_run
//! # fn example() -> std::io::Result<()> {
//! # use logpi::file_reader;
//! // In your CLI or app code:
//! let reader = file_reader::open("logfile.txt.gz")?;
//! // Hand off to the pipeline's chunking reader thread
//! # Ok(())
//! # }
//! ```

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, stdin, BufRead, BufReader};
use std::path::Path;

/// Buffer size for file reading (128KB, matches CLI default)
const BUFFER_SIZE: usize = 128 * 1024;

/// Open a file with automatic gzip detection based on file extension
///
/// Files ending in `.gz` (case-insensitive) are automatically decompressed.
/// Special case: path "-" reads from stdin.
/// Returns a buffered reader ready for line-by-line access.
///
/// # Example
///
/// ```rust,no_run
/// use logpi::file_reader;
///
/// // Compressed file - auto-decompressed
/// let reader = file_reader::open("data.log.gz")?;
///
/// // Plain text file
/// let reader2 = file_reader::open("data.log")?;
///
/// // Stdin
/// let reader3 = file_reader::open("-")?;
/// # Ok::<(), std::io::Error>(())
/// ```
///
/// # Errors
///
/// Returns an error if:
/// - The file doesn't exist
/// - Permission denied
/// - Invalid gzip data (for .gz files)
pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();

    // Special case: "-" means stdin
    if path.to_str() == Some("-") {
        return Ok(Box::new(BufReader::with_capacity(BUFFER_SIZE, stdin())));
    }

    let file = File::open(path)?;

    // Check if file is gzip-compressed based on extension
    let is_gzip = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    if is_gzip {
        // Gzip-compressed: wrap in decoder then buffer
        let decoder = GzDecoder::new(file);
        Ok(Box::new(BufReader::with_capacity(BUFFER_SIZE, decoder)))
    } else {
        // Plain text: just buffer
        Ok(Box::new(BufReader::with_capacity(BUFFER_SIZE, file)))
    }
}

/// Create a reader from an already-opened file with explicit gzip flag
///
/// Useful when you need to override extension-based detection or already
/// have an open file handle.
///
/// # Example
///
/// ```rust,no_run
/// use std::fs::File;
/// use logpi::file_reader;
///
/// let file = File::open("data.bin")?;
/// // Force gzip decompression even though extension isn't .gz
/// let reader = file_reader::from_file(file, true);
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn from_file(file: File, is_gzip: bool) -> Box<dyn BufRead + Send> {
    if is_gzip {
        let decoder = GzDecoder::new(file);
        Box::new(BufReader::with_capacity(BUFFER_SIZE, decoder))
    } else {
        Box::new(BufReader::with_capacity(BUFFER_SIZE, file))
    }
}
