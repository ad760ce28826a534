//! Sequential archive creation.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tar_header::EntryHeader;

use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::options::PackOptions;

use super::{padding, read_exact_body, PackCore, Prepared, END_OF_ARCHIVE};

/// Writes a tar archive of filesystem objects to `W`.
///
/// ```no_run
/// use std::fs::File;
/// use tar_fs::{PackOptions, Packer};
///
/// let mut packer = Packer::new(File::create("out.tar")?, PackOptions {
///     cwd: "/srv/site".into(),
///     portable: true,
///     ..Default::default()
/// })?;
/// packer.add("public")?;
/// packer.finish()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Packer<W: Write> {
    core: PackCore,
    out: W,
}

impl<W: Write> Packer<W> {
    /// Archive objects from the host filesystem.
    ///
    /// # Errors
    ///
    /// Fails if the options are inconsistent.
    pub fn new(out: W, options: PackOptions) -> Result<Self> {
        Ok(Self {
            core: PackCore::new(options, None)?,
            out,
        })
    }

    /// Archive objects from `fs`.
    ///
    /// # Errors
    ///
    /// Fails if the options are inconsistent.
    pub fn with_filesystem(
        out: W,
        options: PackOptions,
        fs: Arc<dyn Filesystem>,
    ) -> Result<Self> {
        Ok(Self {
            core: PackCore::new(options, Some(fs))?,
            out,
        })
    }

    /// Archive `path` (relative to the working directory) and, for a
    /// directory, everything below it in breadth-first order.
    ///
    /// # Errors
    ///
    /// Fails if an object cannot be read, changes size while being read,
    /// or the output cannot be written.
    pub fn add(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut queue = VecDeque::from([path.as_ref().to_path_buf()]);
        while let Some(path) = queue.pop_front() {
            let Some(mut prepared) = self.core.prepare(&path)? else {
                continue;
            };
            self.core.resolve_hard_link(&mut prepared);
            queue.extend(std::mem::take(&mut prepared.children));
            self.write_prepared(prepared)?;
        }
        Ok(())
    }

    fn write_prepared(&mut self, prepared: Prepared) -> Result<()> {
        let Prepared { header, source, .. } = prepared;
        log::debug!("adding {}", header.path_lossy());
        self.out
            .write_all(&self.core.encode_header(&header))
            .map_err(Error::Output)?;
        if let Some(source) = source {
            let out = &mut self.out;
            self.core.read_body(&source, header.size, |chunk| {
                out.write_all(chunk).map_err(Error::Output)
            })?;
            self.out
                .write_all(padding(header.size))
                .map_err(Error::Output)?;
        }
        Ok(())
    }

    /// Append an entry read from elsewhere, such as another archive.
    /// `body` must supply exactly `header.size` bytes when the entry type
    /// carries data.
    ///
    /// # Errors
    ///
    /// Fails if `body` is short or the output cannot be written.
    pub fn add_entry(&mut self, header: &EntryHeader, mut body: impl Read) -> Result<()> {
        let mut header = header.clone();
        header.path = self.core.archive_path(&header.path)?;
        if !header.entry_type.is_file() {
            header.size = 0;
        }
        log::debug!("copying {}", header.path_lossy());
        self.out
            .write_all(&self.core.encode_header(&header))
            .map_err(Error::Output)?;
        let name = PathBuf::from(header.path_lossy().into_owned());
        let out = &mut self.out;
        read_exact_body(&mut body, header.size, &name, &mut |chunk: &[u8]| {
            out.write_all(chunk).map_err(Error::Output)
        })?;
        self.out
            .write_all(padding(header.size))
            .map_err(Error::Output)
    }

    /// Write the end-of-archive marker and return the output.
    ///
    /// # Errors
    ///
    /// Fails if the output cannot be written or flushed.
    pub fn finish(mut self) -> Result<W> {
        self.out.write_all(&END_OF_ARCHIVE).map_err(Error::Output)?;
        self.out.flush().map_err(Error::Output)?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tar_header::stream::TarStreamParser;
    use tar_header::EntryType;

    use crate::fs::MemoryFs;

    use super::*;

    fn source() -> MemoryFs {
        let fs = MemoryFs::new();
        fs.mkdir(Path::new("/src"), 0o755).unwrap();
        fs.write(Path::new("/src/a.txt"), b"hi").unwrap();
        fs.mkdir(Path::new("/src/b"), 0o755).unwrap();
        fs.mkdir(Path::new("/src/b/c"), 0o755).unwrap();
        fs.write(Path::new("/src/b/c/deep"), b"deep").unwrap();
        fs.write(Path::new("/src/b/z"), b"zed").unwrap();
        fs.symlink(Path::new("../a.txt"), Path::new("/src/b/link")).unwrap();
        fs
    }

    fn packer(fs: &MemoryFs, options: PackOptions) -> Packer<Vec<u8>> {
        Packer::with_filesystem(
            Vec::new(),
            PackOptions {
                cwd: "/src".into(),
                ..options
            },
            Arc::new(fs.clone()),
        )
        .unwrap()
    }

    fn listing(data: &[u8]) -> Vec<(String, EntryType, Vec<u8>)> {
        let mut parser = TarStreamParser::with_defaults(Cursor::new(data));
        let mut out = Vec::new();
        while let Some(mut entry) = parser.next_entry().unwrap() {
            let header = entry.header().clone();
            let mut body = Vec::new();
            entry.read_to_end(&mut body).unwrap();
            out.push((header.path_lossy().into_owned(), header.entry_type, body));
        }
        assert!(parser.warnings().is_empty(), "{:?}", parser.warnings());
        out
    }

    #[test]
    fn test_breadth_first() {
        let fs = source();
        let mut packer = packer(&fs, PackOptions::default());
        packer.add("a.txt").unwrap();
        packer.add("b").unwrap();
        let data = packer.finish().unwrap();
        assert_eq!(data.len() % 512, 0);
        assert!(data.ends_with(&[0; 1024]));

        let names: Vec<_> = listing(&data)
            .into_iter()
            .map(|(name, kind, body)| (name, kind, String::from_utf8(body).unwrap()))
            .collect();
        similar_asserts::assert_eq!(
            names,
            [
                ("a.txt".to_owned(), EntryType::Regular, "hi".to_owned()),
                ("b/".to_owned(), EntryType::Directory, String::new()),
                ("b/c/".to_owned(), EntryType::Directory, String::new()),
                ("b/link".to_owned(), EntryType::Symlink, String::new()),
                ("b/z".to_owned(), EntryType::Regular, "zed".to_owned()),
                ("b/c/deep".to_owned(), EntryType::Regular, "deep".to_owned()),
            ]
        );
    }

    #[test]
    fn test_matches_tar_crate() {
        let fs = source();
        let mut packer = packer(&fs, PackOptions::default());
        packer.add("b").unwrap();
        let data = packer.finish().unwrap();

        let mut archive = tar::Archive::new(&data[..]);
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path().unwrap().into_owned();
            if path.as_os_str() == "b/link" {
                assert_eq!(entry.link_name().unwrap().unwrap(), Path::new("../a.txt"));
            }
            seen.push(path);
        }
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_long_path_round_trips() {
        let fs = source();
        let long = "d".repeat(120);
        fs.mkdir(&Path::new("/src").join(&long), 0o755).unwrap();
        fs.write(&Path::new("/src").join(&long).join("f"), b"x").unwrap();
        let mut packer = packer(&fs, PackOptions::default());
        packer.add(&long).unwrap();
        let entries = listing(&packer.finish().unwrap());
        assert_eq!(entries[1].0, format!("{long}/f"));
    }

    #[test]
    fn test_add_entry() {
        let fs = source();
        let mut packer = packer(
            &fs,
            PackOptions {
                prefix: Some("copy".into()),
                ..Default::default()
            },
        );
        let mut header = EntryHeader::new(EntryType::Regular, "note");
        header.mode = 0o600;
        header.size = 5;
        packer.add_entry(&header, &b"hello"[..]).unwrap();

        let short = packer.add_entry(&header, &b"hey"[..]).unwrap_err();
        assert!(short.to_string().contains("unexpected EOF"), "{short}");
    }

    #[test]
    fn test_missing_path() {
        let fs = source();
        let mut packer = packer(&fs, PackOptions::default());
        assert!(matches!(packer.add("nope"), Err(Error::Io { .. })));
    }

    #[test]
    fn test_prefixed_copy() {
        let fs = source();
        let mut packer = packer(
            &fs,
            PackOptions {
                prefix: Some("copy".into()),
                ..Default::default()
            },
        );
        let mut header = EntryHeader::new(EntryType::Directory, "d/");
        header.mode = 0o755;
        packer.add_entry(&header, std::io::empty()).unwrap();
        let entries = listing(&packer.finish().unwrap());
        assert_eq!(entries[0].0, "copy/d/");
    }
}
