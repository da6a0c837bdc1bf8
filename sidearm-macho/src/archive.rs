//! Fat (universal) containers and owned Mach-O images.
//!
//! [`MachArchive`] enumerates the slices of a universal binary over borrowed
//! bytes. [`MachImage`] and [`MachContainer`] are the owned, shareable entry
//! points: they keep the backing [`ByteView`] alive next to the parsed
//! [`MachBinary`] in a [`SelfCell`], so analysis structures can borrow image
//! bytes for as long as the image is referenced.

use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use scroll::Pread;

use sidearm_common::{Arch, AsSelf, ByteView, SelfCell};

use crate::binary::MachBinary;
use crate::error::{MachErrorKind, Result};
use crate::raw;

impl<'slf> AsSelf<'slf> for MachBinary<'_> {
    type Ref = MachBinary<'slf>;

    fn as_self(&'slf self) -> &Self::Ref {
        self
    }
}

/// One slice of a fat container: its CPU identity and byte range.
#[derive(Clone, Debug)]
pub struct SliceDescriptor {
    /// Raw Mach CPU type.
    pub cputype: u32,
    /// Raw Mach CPU subtype.
    pub cpusubtype: u32,
    /// The slice's byte range within the container.
    pub range: Range<usize>,
}

/// A Mach-O archive: either a thin image or a fat container of slices.
///
/// Slices are parsed just-in-time while iterating; a slice that fails to
/// parse yields an error without invalidating the iterator.
pub struct MachArchive<'d> {
    data: &'d [u8],
    slices: Vec<SliceDescriptor>,
}

impl<'d> MachArchive<'d> {
    /// Tests whether the buffer contains a fat container (`Some(true)`), a
    /// thin Mach-O image (`Some(false)`), or neither (`None`).
    ///
    /// The accepted magics come in byte-swapped pairs, so one little-endian
    /// read classifies both byte orders.
    pub fn is_fat(data: &[u8]) -> Option<bool> {
        match data.pread_with::<u32>(0, scroll::LE).ok()? {
            raw::FAT_MAGIC | raw::FAT_CIGAM => Some(true),
            raw::MH_MAGIC | raw::MH_CIGAM | raw::MH_MAGIC_64 | raw::MH_CIGAM_64 => Some(false),
            _ => None,
        }
    }

    /// Parses the archive table of contents.
    pub fn parse(data: &'d [u8]) -> Result<Self> {
        let magic: u32 = data
            .pread_with(0, scroll::BE)
            .map_err(|e| MachErrorKind::MalformedHeader.with_source(e))?;

        let slices = match magic {
            raw::FAT_MAGIC | raw::FAT_CIGAM => {
                // The fat table is big-endian on disk; FAT_CIGAM would only
                // appear when inspecting a table that was byte-swapped in
                // memory, which we read little-endian.
                let endian = if magic == raw::FAT_MAGIC {
                    scroll::BE
                } else {
                    scroll::LE
                };

                let header: raw::FatHeader = data
                    .pread_with(0, endian)
                    .map_err(|e| MachErrorKind::MalformedHeader.with_source(e))?;

                let mut offset = std::mem::size_of::<raw::FatHeader>();
                let mut slices = Vec::with_capacity(header.nfat_arch.min(64) as usize);
                for _ in 0..header.nfat_arch {
                    let arch: raw::FatArch = data
                        .gread_with(&mut offset, endian)
                        .map_err(|e| MachErrorKind::MalformedHeader.with_source(e))?;

                    let start = arch.offset as usize;
                    let end = start
                        .checked_add(arch.size as usize)
                        .filter(|&end| end <= data.len())
                        .ok_or(MachErrorKind::InconsistentSegment)?;

                    slices.push(SliceDescriptor {
                        cputype: arch.cputype,
                        cpusubtype: arch.cpusubtype & raw::CPU_SUBTYPE_MASK,
                        range: start..end,
                    });
                }
                slices
            }
            _ if MachBinary::test(data) => vec![{
                let header_cputype: u32 = data
                    .pread_with(4, scroll::LE)
                    .map_err(|e| MachErrorKind::MalformedHeader.with_source(e))?;
                let header_cpusubtype: u32 = data
                    .pread_with(8, scroll::LE)
                    .map_err(|e| MachErrorKind::MalformedHeader.with_source(e))?;
                SliceDescriptor {
                    cputype: header_cputype,
                    cpusubtype: header_cpusubtype & raw::CPU_SUBTYPE_MASK,
                    range: 0..data.len(),
                }
            }],
            _ => return Err(MachErrorKind::MalformedHeader.into()),
        };

        Ok(MachArchive { data, slices })
    }

    /// Whether the underlying container is fat.
    pub fn is_fat_archive(&self) -> bool {
        Self::is_fat(self.data) == Some(true)
    }

    /// The number of slices in this archive.
    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    /// The slice descriptors, in table order.
    pub fn slices(&self) -> &[SliceDescriptor] {
        &self.slices
    }

    /// Parses the slice at the given index.
    pub fn slice_binary(&self, index: usize) -> Result<MachBinary<'d>> {
        let descriptor = self
            .slices
            .get(index)
            .ok_or(MachErrorKind::MalformedHeader)?;
        MachBinary::parse(&self.data[descriptor.range.clone()])
    }

    /// An iterator over the parsed slices.
    pub fn binaries(&self) -> impl Iterator<Item = Result<MachBinary<'d>>> + '_ {
        (0..self.slices.len()).map(move |i| self.slice_binary(i))
    }
}

impl fmt::Debug for MachArchive<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachArchive")
            .field("is_fat", &self.is_fat_archive())
            .field("slices", &self.slices)
            .finish()
    }
}

/// An owned, parsed Mach-O image.
///
/// A `MachImage` owns its backing bytes for its lifetime; every derived
/// structure ([`MachAnalyzer`](https://docs.rs/sidearm-analyze), ObjC tables,
/// symbol indexes) holds an `Arc` of exactly one image and reads through it.
/// The backing bytes are treated as immutable once an image exists.
pub struct MachImage {
    cell: SelfCell<ByteView<'static>, MachBinary<'static>>,
}

impl MachImage {
    /// Parses a thin image from the given view.
    pub fn parse(view: ByteView<'static>) -> Result<Arc<Self>> {
        let len = view.len();
        Self::parse_slice(view, 0..len)
    }

    /// Parses the image occupying `range` of the given view, typically one
    /// slice of a fat container.
    pub fn parse_slice(view: ByteView<'static>, range: Range<usize>) -> Result<Arc<Self>> {
        if range.end > view.len() || range.start > range.end {
            return Err(MachErrorKind::InconsistentSegment.into());
        }
        let cell = SelfCell::try_new(view, |data| {
            MachBinary::parse(&unsafe { &*data }[range.clone()])
        })?;
        Ok(Arc::new(MachImage { cell }))
    }

    /// The parsed binary.
    pub fn binary(&self) -> &MachBinary<'_> {
        self.cell.get()
    }

    /// The raw bytes of this image (for a fat slice, only the slice).
    pub fn data(&self) -> &[u8] {
        self.binary().data()
    }

    /// A stable identity for this image, derived from its backing bytes.
    /// Two `Arc` clones of the same image share the identity; distinct
    /// parses of equal bytes do not.
    pub fn identity(&self) -> (usize, usize) {
        let data = self.data();
        (data.as_ptr() as usize, data.len())
    }

    /// The CPU architecture of the image.
    pub fn arch(&self) -> Arch {
        self.binary().arch()
    }
}

impl fmt::Debug for MachImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachImage")
            .field("arch", &self.arch())
            .field("len", &self.data().len())
            .finish()
    }
}

/// A session-level container of parsed images: one per slice of the input.
///
/// Created once from a file or buffer and kept for the whole analysis
/// session. All slices must parse; only ARM64 slices can be analyzed, the
/// rest are enumerable.
pub struct MachContainer {
    images: Vec<Arc<MachImage>>,
    is_fat: bool,
}

impl MachContainer {
    /// Memory-maps and parses the image or fat container at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let view = ByteView::open(path).map_err(|e| MachErrorKind::Io.with_source(e))?;
        Self::from_view(view)
    }

    /// Parses the image or fat container in the given view.
    pub fn from_view(view: ByteView<'static>) -> Result<Self> {
        let archive = MachArchive::parse(&view)?;
        let is_fat = archive.is_fat_archive();
        let ranges: Vec<Range<usize>> = archive.slices().iter().map(|s| s.range.clone()).collect();

        let mut images = Vec::with_capacity(ranges.len());
        for range in ranges {
            images.push(MachImage::parse_slice(view.clone(), range)?);
        }

        Ok(MachContainer { images, is_fat })
    }

    /// Whether the input was a fat container.
    pub fn is_fat(&self) -> bool {
        self.is_fat
    }

    /// The parsed images, in slice order.
    pub fn images(&self) -> &[Arc<MachImage>] {
        &self.images
    }

    /// The first ARM64 slice, which is the one `sidearm` analyzes.
    pub fn arm64_image(&self) -> Option<&Arc<MachImage>> {
        self.images.iter().find(|image| image.arch().is_arm64())
    }

    /// The slice with the given CPU type and subtype, if present.
    pub fn image_by_cpu(&self, cputype: u32, cpusubtype: u32) -> Option<&Arc<MachImage>> {
        self.images.iter().find(|image| {
            let binary = image.binary();
            binary.cputype() == cputype && binary.cpusubtype() == cpusubtype
        })
    }
}

impl fmt::Debug for MachContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachContainer")
            .field("is_fat", &self.is_fat)
            .field("images", &self.images)
            .finish()
    }
}
