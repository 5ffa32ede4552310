// Cache — record emitted minibatches once, replay them bit for bit
//
// Binary cache format (.ucic), all integers little-endian:
//
//   Header:
//     magic:          [u8; 4] = b"UCIC"
//     version:        u32     = 2
//     elem:           u8      (0=F32, 1=F64)
//     mb_size:        u64
//     epoch_size:     u64
//     epoch:          u64
//     total_samples:  u64
//     window:         u64     (shuffle window in records, 0 = source order)
//     partial:        u8
//     feature_dim:    u64
//     label_rows:     u64
//     mapping_offset: u64     (patched when the cache is finished)
//
//   Frames, one per minibatch, in delivery order:
//     tag:      u8 = 1
//     samples:  u64
//     streams:  u32
//     for each stream (sorted by name):
//       name_len: u32, name: [u8; name_len]
//       rows: u64, cols: u64
//       data: [elem; rows * cols]   (column-major)
//
//   End marker: tag u8 = 0
//
//   Label mapping (at mapping_offset):
//     count: u32, then per entry: id u32, len u32, label [u8; len]
//
// A cache is written to `<path>.partial` and renamed into place only after a
// whole epoch went through it, so a reader never sees half a cache.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use uci_core::{ElemKind, Element, Error, Matrix, Result};

use crate::data_reader::{DataReader, EndDataType, Minibatch, MinibatchLayout, REQUEST_DATA_SIZE};
use crate::epoch::EpochCursor;
use crate::label_map::LabelId;

// Constants

const MAGIC: &[u8; 4] = b"UCIC";
const VERSION: u32 = 2;
const TAG_FRAME: u8 = 1;
const TAG_END: u8 = 0;

// Low-level IO helpers

fn write_u8(w: &mut impl Write, v: u8) -> std::io::Result<()> {
    w.write_all(&[v])
}

fn write_u32(w: &mut impl Write, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_str(w: &mut impl Write, s: &str) -> std::io::Result<()> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn read_u8(r: &mut impl Read) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_bytes(r: &mut impl Read, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_string(r: &mut impl Read) -> Result<String> {
    let len = read_u32(r)? as usize;
    String::from_utf8(read_bytes(r, len)?)
        .map_err(|e| Error::CacheFormat(format!("invalid UTF-8 string: {e}")))
}

fn to_usize(v: u64, what: &str) -> Result<usize> {
    usize::try_from(v).map_err(|_| Error::CacheFormat(format!("{what} {v} does not fit in usize")))
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

// Header

/// What a cache was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHeader {
    pub kind: ElemKind,
    pub mb_size: usize,
    pub epoch_size: usize,
    pub epoch: usize,
    pub total_samples: usize,
    /// Records per shuffle window, 0 when the source order was kept.
    pub window: usize,
    pub partial_minibatch: bool,
    pub feature_dim: usize,
    pub label_rows: usize,
}

impl CacheHeader {
    /// Whether replaying this cache reproduces a live read of the given loop.
    ///
    /// Element type, minibatch size, epoch size and the partial-minibatch
    /// policy must match. With randomization the epoch must match too,
    /// without it the epoch only has to start at the same physical record.
    pub fn serves(
        &self,
        kind: ElemKind,
        mb_size: usize,
        epoch: usize,
        requested_epoch_samples: usize,
        partial_minibatch: bool,
    ) -> bool {
        let epoch_size = if requested_epoch_samples == REQUEST_DATA_SIZE {
            self.total_samples
        } else {
            requested_epoch_samples
        };
        if kind != self.kind
            || mb_size != self.mb_size
            || epoch_size != self.epoch_size
            || partial_minibatch != self.partial_minibatch
            || self.total_samples == 0
        {
            return false;
        }
        if epoch == self.epoch {
            return true;
        }
        let total = self.total_samples as u128;
        !self.is_randomized()
            && (epoch as u128 * epoch_size as u128) % total
                == (self.epoch as u128 * epoch_size as u128) % total
    }

    pub fn is_randomized(&self) -> bool {
        self.window != 0
    }

    fn write(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        write_u32(w, VERSION)?;
        write_u8(w, self.kind.to_u8())?;
        write_u64(w, self.mb_size as u64)?;
        write_u64(w, self.epoch_size as u64)?;
        write_u64(w, self.epoch as u64)?;
        write_u64(w, self.total_samples as u64)?;
        write_u64(w, self.window as u64)?;
        write_u8(w, self.partial_minibatch as u8)?;
        write_u64(w, self.feature_dim as u64)?;
        write_u64(w, self.label_rows as u64)
    }

    fn read(r: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::CacheFormat(format!(
                "invalid magic: expected {:?}, got {:?}",
                MAGIC, magic
            )));
        }
        let version = read_u32(r)?;
        if version != VERSION {
            return Err(Error::CacheFormat(format!(
                "unsupported version: {version} (expected {VERSION})"
            )));
        }
        Ok(Self {
            kind: ElemKind::from_u8(read_u8(r)?)?,
            mb_size: to_usize(read_u64(r)?, "mb_size")?,
            epoch_size: to_usize(read_u64(r)?, "epoch_size")?,
            epoch: to_usize(read_u64(r)?, "epoch")?,
            total_samples: to_usize(read_u64(r)?, "total_samples")?,
            window: to_usize(read_u64(r)?, "window")?,
            partial_minibatch: read_u8(r)? != 0,
            feature_dim: to_usize(read_u64(r)?, "feature_dim")?,
            label_rows: to_usize(read_u64(r)?, "label_rows")?,
        })
    }
}

// CacheWriter

/// Appends minibatches to a cache under construction.
///
/// Dropping an unfinished writer deletes the partial file.
pub struct CacheWriter<E: Element> {
    path: PathBuf,
    partial: PathBuf,
    writer: Option<BufWriter<File>>,
    mapping_offset_pos: u64,
    frames: u64,
    _elem: PhantomData<E>,
}

impl<E: Element> CacheWriter<E> {
    pub fn create(path: impl AsRef<Path>, header: &CacheHeader) -> Result<Self> {
        if header.kind != E::KIND {
            return Err(Error::CacheFormat(format!(
                "header is for {}, writer for {}",
                header.kind,
                E::KIND
            )));
        }
        let path = path.as_ref().to_path_buf();
        let partial = partial_path(&path);
        let mut writer = BufWriter::new(File::create(&partial)?);
        header.write(&mut writer)?;
        let mapping_offset_pos = writer.stream_position()?;
        write_u64(&mut writer, 0)?;
        Ok(Self {
            path,
            partial,
            writer: Some(writer),
            mapping_offset_pos,
            frames: 0,
            _elem: PhantomData,
        })
    }

    /// Minibatches written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Append one minibatch of `samples` samples.
    pub fn write_frame(&mut self, samples: usize, streams: &Minibatch<E>) -> Result<()> {
        let w = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::InvalidState("cache writer already finished".to_string()))?;
        let mut names: Vec<&String> = streams.keys().collect();
        names.sort();

        write_u8(w, TAG_FRAME)?;
        write_u64(w, samples as u64)?;
        write_u32(w, names.len() as u32)?;
        let mut bytes = Vec::new();
        for name in names {
            let m = &streams[name];
            write_str(w, name)?;
            write_u64(w, m.rows() as u64)?;
            write_u64(w, m.cols() as u64)?;
            bytes.clear();
            for &v in m.as_slice() {
                v.write_le(&mut bytes);
            }
            w.write_all(&bytes)?;
        }
        self.frames += 1;
        Ok(())
    }

    /// Close the frame list, append the label mapping and move the cache
    /// into place.
    pub fn finish(mut self, mapping: &BTreeMap<LabelId, String>) -> Result<PathBuf> {
        let mut w = self
            .writer
            .take()
            .ok_or_else(|| Error::InvalidState("cache writer already finished".to_string()))?;
        write_u8(&mut w, TAG_END)?;
        let mapping_offset = w.stream_position()?;
        write_u32(&mut w, mapping.len() as u32)?;
        for (&id, label) in mapping {
            write_u32(&mut w, id)?;
            write_str(&mut w, label)?;
        }
        w.seek(SeekFrom::Start(self.mapping_offset_pos))?;
        write_u64(&mut w, mapping_offset)?;
        w.flush()?;
        drop(w);
        fs::rename(&self.partial, &self.path)?;
        Ok(self.path.clone())
    }
}

impl<E: Element> Drop for CacheWriter<E> {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.partial);
        }
    }
}

// CacheReader

/// Replays a finished cache through the [`DataReader`] interface.
pub struct CacheReader<E: Element> {
    path: PathBuf,
    header: CacheHeader,
    reader: Option<BufReader<File>>,
    frames_start: u64,
    mapping: BTreeMap<LabelId, String>,
    label_section: String,
    cursor: Option<EpochCursor>,
    exhausted: bool,
    layout: MinibatchLayout,
    _elem: PhantomData<E>,
}

impl<E: Element> CacheReader<E> {
    /// Open a finished cache. `label_section` names the label stream whose
    /// mapping the cache carries.
    pub fn open(path: impl AsRef<Path>, label_section: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut r = BufReader::new(File::open(&path)?);
        let header = CacheHeader::read(&mut r)?;
        if header.kind != E::KIND {
            return Err(Error::CacheFormat(format!(
                "{} holds {} data, reader wants {}",
                path.display(),
                header.kind,
                E::KIND
            )));
        }
        let mapping_offset = read_u64(&mut r)?;
        let frames_start = r.stream_position()?;
        if mapping_offset == 0 {
            return Err(Error::CacheFormat(format!(
                "{} was never finished",
                path.display()
            )));
        }

        r.seek(SeekFrom::Start(mapping_offset))?;
        let count = read_u32(&mut r)?;
        let mut mapping = BTreeMap::new();
        for _ in 0..count {
            let id = read_u32(&mut r)?;
            mapping.insert(id, read_string(&mut r)?);
        }
        r.seek(SeekFrom::Start(frames_start))?;

        Ok(Self {
            path,
            header,
            reader: Some(r),
            frames_start,
            mapping,
            label_section: label_section.into(),
            cursor: None,
            exhausted: false,
            layout: MinibatchLayout::default(),
            _elem: PhantomData,
        })
    }

    pub fn header(&self) -> &CacheHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_frame(&mut self, outputs: &mut Minibatch<E>) -> Result<Option<usize>> {
        let r = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::InvalidState("cache reader has been destroyed".to_string()))?;
        match read_u8(r)? {
            TAG_END => return Ok(None),
            TAG_FRAME => {}
            tag => return Err(Error::CacheFormat(format!("unknown frame tag: {tag}"))),
        }
        let samples = to_usize(read_u64(r)?, "samples")?;
        let streams = read_u32(r)?;
        let elem_size = E::KIND.size_in_bytes();
        for _ in 0..streams {
            let name = read_string(r)?;
            let rows = to_usize(read_u64(r)?, "rows")?;
            let cols = to_usize(read_u64(r)?, "cols")?;
            let bytes = read_bytes(r, rows * cols * elem_size)?;
            let data = bytes.chunks_exact(elem_size).map(E::read_le).collect();
            let m = Matrix::from_vec(rows, cols, data)?;
            outputs.entry(name).or_default().copy_from(&m);
        }
        Ok(Some(samples))
    }
}

impl<E: Element> DataReader<E> for CacheReader<E> {
    fn start_minibatch_loop(
        &mut self,
        mb_size: usize,
        epoch: usize,
        requested_epoch_samples: usize,
    ) -> Result<()> {
        let h = &self.header;
        if !h.serves(E::KIND, mb_size, epoch, requested_epoch_samples, h.partial_minibatch) {
            return Err(Error::config(format!(
                "cache {} was built for mb_size {} / epoch {} of {} samples, not mb_size {mb_size} / epoch {epoch}",
                self.path.display(),
                h.mb_size,
                h.epoch,
                h.epoch_size
            )));
        }
        let cursor = EpochCursor::start(
            mb_size,
            epoch,
            requested_epoch_samples,
            h.total_samples,
            h.partial_minibatch,
        )?;
        let r = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::InvalidState("cache reader has been destroyed".to_string()))?;
        r.seek(SeekFrom::Start(self.frames_start))?;
        self.cursor = Some(cursor);
        self.exhausted = false;
        Ok(())
    }

    fn get_minibatch(&mut self, outputs: &mut Minibatch<E>) -> Result<bool> {
        if self.cursor.is_none() {
            return Err(Error::InvalidState(
                "get_minibatch called before start_minibatch_loop".to_string(),
            ));
        }
        if self.exhausted {
            return Ok(false);
        }
        match self.read_frame(outputs)? {
            Some(samples) => {
                if let Some(c) = self.cursor.as_mut() {
                    c.advance(samples);
                }
                self.layout = MinibatchLayout::for_samples(samples);
                Ok(true)
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    fn data_end(&self, end: EndDataType) -> bool {
        match &self.cursor {
            Some(c) => (end == EndDataType::Epoch && self.exhausted) || c.data_end(end),
            None => end != EndDataType::Null,
        }
    }

    fn label_mapping(&self, section: &str) -> Result<&BTreeMap<LabelId, String>> {
        if section != self.label_section {
            return Err(Error::config(format!(
                "no label mapping for section {section:?}"
            )));
        }
        Ok(&self.mapping)
    }

    fn set_label_mapping(
        &mut self,
        _section: &str,
        _mapping: &BTreeMap<LabelId, String>,
    ) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "a cached label mapping cannot be replaced".to_string(),
        ))
    }

    fn minibatch_layout(&self) -> MinibatchLayout {
        self.layout
    }

    fn destroy(&mut self) {
        self.reader = None;
        self.cursor = None;
        self.exhausted = true;
    }
}
