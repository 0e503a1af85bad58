//! Preprocessing data on disk.
//!
//! Data of one kind lives in `<prep_dir>/<n>-<ring>-<bits>/<Kind>-<ring>-P<player>`
//! (input masks additionally carry the owner: `Inputs-<ring>-P<player>-<owner>`).
//! A file starts with the signature of its item type as `[u64 LE length][utf-8]`,
//! followed by the packed items back to back.
use std::{
    fmt,
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
};

use tracing::{debug, trace};

use crate::{config::Config, error::Error, ring::RingElement, share::Persist};

/// Upper bound for the signature length, guards against reading garbage headers.
const MAX_SIGNATURE_LEN: u64 = 1024;

/// The kinds of preprocessing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Beaver triples.
    Triples,
    /// Pairs `(a, a^2)`.
    Squares,
    /// Random bits.
    Bits,
    /// Pairs `(a, a^-1)`.
    Inverses,
    /// Input masks of the given owner.
    Inputs(usize),
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Triples => f.write_str("Triples"),
            DataKind::Squares => f.write_str("Squares"),
            DataKind::Bits => f.write_str("Bits"),
            DataKind::Inverses => f.write_str("Inverses"),
            DataKind::Inputs(_) => f.write_str("Inputs"),
        }
    }
}

/// The file of `kind` for party `me` of `n_parties` with values in `T`.
pub fn prep_path<T: RingElement>(
    prep_dir: &Path,
    n_parties: usize,
    kind: DataKind,
    me: usize,
) -> PathBuf {
    let dir = prep_dir.join(format!("{n_parties}-{}-{}", T::NAME, T::BITS));
    let file = match kind {
        DataKind::Inputs(owner) => format!("{kind}-{}-P{me}-{owner}", T::NAME),
        _ => format!("{kind}-{}-P{me}", T::NAME),
    };
    dir.join(file)
}

/// Writes `items` to this party's file of `kind` below [`Config::prep_dir`],
/// replacing its previous contents.
///
/// Returns the path of the file, or `None` if no directory is configured.
pub fn store<T: RingElement, D: Persist>(
    config: &Config,
    kind: DataKind,
    items: &[D],
) -> Result<Option<PathBuf>, Error> {
    let Some(dir) = &config.prep_dir else {
        return Ok(None);
    };
    let path = prep_path::<T>(dir, config.n_parties, kind, config.my_num);
    let mut writer = PrepWriter::create(path)?;
    writer.write(items)?;
    let path = writer.finish()?;
    debug!(?path, n = items.len(), "stored checked preprocessing data");
    Ok(Some(path))
}

/// Appends items of type `D` to a new preprocessing file.
#[derive(Debug)]
pub struct PrepWriter<D: Persist> {
    path: PathBuf,
    file: BufWriter<File>,
    written: usize,
    _data: PhantomData<D>,
}

impl<D: Persist> PrepWriter<D> {
    /// Creates (or truncates) the file at `path` and writes the header.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = BufWriter::new(File::create(&path)?);
        let signature = D::signature();
        file.write_all(&(signature.len() as u64).to_le_bytes())?;
        file.write_all(signature.as_bytes())?;
        debug!(?path, signature, "created preprocessing file");
        Ok(Self {
            path,
            file,
            written: 0,
            _data: PhantomData,
        })
    }

    /// Appends `items`.
    pub fn write(&mut self, items: &[D]) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(items.len() * D::PACKED_LEN);
        items.iter().for_each(|item| item.pack(&mut buf));
        self.file.write_all(&buf)?;
        self.written += items.len();
        trace!(path = ?self.path, n = items.len(), "wrote preprocessing data");
        Ok(())
    }

    /// The number of items written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes the buffered items to disk.
    pub fn finish(mut self) -> Result<PathBuf, Error> {
        self.file.flush()?;
        Ok(self.path)
    }
}

/// Reads items of type `D` from a preprocessing file.
#[derive(Debug)]
pub struct PrepReader<D: Persist> {
    path: PathBuf,
    file: BufReader<File>,
    _data: PhantomData<D>,
}

impl<D: Persist> PrepReader<D> {
    /// Opens the file at `path` and checks that it holds items of type `D`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let mut file = BufReader::new(File::open(&path)?);
        let expected = D::signature();
        let mut len = [0; 8];
        file.read_exact(&mut len)?;
        let len = u64::from_le_bytes(len);
        let found = if len > MAX_SIGNATURE_LEN {
            format!("<header of {len} bytes>")
        } else {
            let mut bytes = vec![0; len as usize];
            file.read_exact(&mut bytes)?;
            String::from_utf8_lossy(&bytes).into_owned()
        };
        if found != expected {
            return Err(Error::SignatureMismatch { path, expected, found });
        }
        Ok(Self {
            path,
            file,
            _data: PhantomData,
        })
    }

    /// Reads the next `n` items, failing with [`Error::InsufficientPreprocessing`]
    /// if the file holds fewer.
    pub fn read(&mut self, n: usize) -> Result<Vec<D>, Error> {
        let insufficient = || Error::InsufficientPreprocessing(self.path.clone());
        let len = n.checked_mul(D::PACKED_LEN).ok_or_else(insufficient)?;
        // the buffer only grows with the data actually present in the file
        let mut buf = Vec::new();
        (&mut self.file).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() < len {
            return Err(insufficient());
        }
        buf.chunks_exact(D::PACKED_LEN).map(D::unpack).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ring::{Gfp127, Z64, Z128},
        share::{Share, Triple},
    };

    fn triple(x: u128) -> Triple<Gfp127> {
        let s = |v: u128| Share::new(Gfp127::new(v), Gfp127::new(v + 1));
        Triple {
            a: s(x),
            b: s(x + 10),
            c: s(x + 20),
        }
    }

    #[test]
    fn paths_follow_the_layout() {
        let dir = Path::new("/prep");
        assert_eq!(
            Path::new("/prep/3-p127-127/Triples-p127-P1"),
            prep_path::<Gfp127>(dir, 3, DataKind::Triples, 1)
        );
        assert_eq!(
            Path::new("/prep/2-Z64-64/Inputs-Z64-P0-1"),
            prep_path::<Z64>(dir, 2, DataKind::Inputs(1), 0)
        );
    }

    #[test]
    fn write_then_read() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let path = prep_path::<Gfp127>(dir.path(), 2, DataKind::Triples, 0);
        let mut writer = PrepWriter::create(&path)?;
        writer.write(&[triple(1), triple(2)])?;
        writer.write(&[triple(3)])?;
        assert_eq!(3, writer.written());
        writer.finish()?;

        let mut reader = PrepReader::<Triple<Gfp127>>::open(&path)?;
        assert_eq!(vec![triple(1), triple(2)], reader.read(2)?);
        assert_eq!(vec![triple(3)], reader.read(1)?);
        assert!(matches!(reader.read(1), Err(Error::InsufficientPreprocessing(_))));
        Ok(())
    }

    #[test]
    fn oversized_reads_fail_without_allocating() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let path = prep_path::<Gfp127>(dir.path(), 2, DataKind::Triples, 0);
        let mut writer = PrepWriter::create(&path)?;
        writer.write(&[triple(1)])?;
        writer.finish()?;

        let mut reader = PrepReader::<Triple<Gfp127>>::open(&path)?;
        assert!(matches!(reader.read(usize::MAX), Err(Error::InsufficientPreprocessing(_))));
        let huge = usize::MAX / <Triple<Gfp127> as Persist>::PACKED_LEN;
        assert!(matches!(reader.read(huge), Err(Error::InsufficientPreprocessing(_))));
        Ok(())
    }

    #[test]
    fn store_follows_the_configured_directory() -> Result<(), Error> {
        let items = [triple(4), triple(5)];
        assert_eq!(None, store::<Gfp127, _>(&Config::new(3, 2), DataKind::Triples, &items)?);

        let dir = tempfile::tempdir()?;
        let config = Config {
            prep_dir: Some(dir.path().to_path_buf()),
            ..Config::new(3, 2)
        };
        let path = store::<Gfp127, _>(&config, DataKind::Triples, &items)?;
        let expected = prep_path::<Gfp127>(dir.path(), 3, DataKind::Triples, 2);
        assert_eq!(Some(expected.clone()), path);
        let mut reader = PrepReader::<Triple<Gfp127>>::open(expected)?;
        assert_eq!(items.to_vec(), reader.read(2)?);
        Ok(())
    }

    #[test]
    fn wrong_type_is_rejected() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("Triples");
        PrepWriter::<Triple<Gfp127>>::create(&path)?.finish()?;
        let res = PrepReader::<Triple<Z64, Z128>>::open(&path);
        assert!(matches!(res, Err(Error::SignatureMismatch { .. })));
        Ok(())
    }
}
