//! Minimal ELF32 reader that extracts global function symbols.
//!
//! Only the section-header table, the first `SHT_SYMTAB` and its string
//! table are touched. Program headers and relocations are ignored.

use std::fs;
use std::path::Path;

use log::{debug, info};
use thiserror::Error;

use crate::Word;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

const EHDR_SIZE: usize = 52;
const E_SHOFF: usize = 32;
const E_SHENTSIZE: usize = 46;
const E_SHNUM: usize = 48;

const SHDR_SIZE: usize = 40;
const SH_TYPE: usize = 4;
const SH_OFFSET: usize = 16;
const SH_SIZE: usize = 20;
const SH_LINK: usize = 24;

const SYM_SIZE: usize = 16;
const ST_NAME: usize = 0;
const ST_VALUE: usize = 4;
const ST_INFO: usize = 12;

const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;

/// `st_info` of a global (`STB_GLOBAL`) function (`STT_FUNC`) symbol.
const GLOBAL_FUNCTION_INFO: u8 = 0x12;

/// A named function entry point from the image symbol table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FunctionSymbol {
    /// Symbol name.
    pub name: String,
    /// Entry address.
    pub address: Word,
}

/// Failures while reading an executable image.
#[derive(Debug, Error)]
pub enum ImageLoadError {
    /// The image could not be read from disk.
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),
    /// The file does not start with the ELF magic.
    #[error("not an ELF image")]
    BadMagic,
    /// `EI_CLASS` is not 32-bit.
    #[error("unsupported ELF class {0}")]
    UnsupportedClass(u8),
    /// `EI_DATA` names neither byte order.
    #[error("unsupported ELF data encoding {0}")]
    UnsupportedEncoding(u8),
    /// `e_shentsize` does not match the ELF32 section header size.
    #[error("section header entry size is {0}, expected 40")]
    BadSectionEntrySize(u16),
    /// A structure extends past the end of the image.
    #[error("image truncated while reading {what}")]
    Truncated {
        /// Structure being read.
        what: &'static str,
    },
    /// No `SHT_SYMTAB` section exists.
    #[error("image has no symbol table")]
    MissingSymbolTable,
    /// No `SHT_STRTAB` section exists.
    #[error("image has no string table")]
    MissingStringTable,
    /// A symbol name offset points outside the string table.
    #[error("symbol name offset {0} is outside the string table")]
    NameOutOfBounds(u32),
}

#[derive(Debug, Clone, Copy)]
enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy)]
struct Reader<'a> {
    bytes: &'a [u8],
    endian: Endian,
}

impl<'a> Reader<'a> {
    fn slice(&self, offset: usize, len: usize, what: &'static str) -> Result<&'a [u8], ImageLoadError> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(ImageLoadError::Truncated { what })
    }

    fn read_u16(&self, offset: usize, what: &'static str) -> Result<u16, ImageLoadError> {
        let raw: [u8; 2] = self
            .slice(offset, 2, what)?
            .try_into()
            .map_err(|_| ImageLoadError::Truncated { what })?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        })
    }

    fn read_u32(&self, offset: usize, what: &'static str) -> Result<u32, ImageLoadError> {
        let raw: [u8; 4] = self
            .slice(offset, 4, what)?
            .try_into()
            .map_err(|_| ImageLoadError::Truncated { what })?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Section {
    kind: u32,
    offset: usize,
    size: usize,
    link: usize,
}

/// Reads the image at `path` and returns its global function symbols.
///
/// # Errors
///
/// Returns [`ImageLoadError::Io`] when the file cannot be read, otherwise
/// any error of [`parse_function_symbols`].
pub fn load_function_symbols(path: impl AsRef<Path>) -> Result<Vec<FunctionSymbol>, ImageLoadError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let symbols = parse_function_symbols(&bytes)?;
    info!(
        "loaded {} function symbols from {}",
        symbols.len(),
        path.display()
    );
    Ok(symbols)
}

/// Extracts every `st_info == 0x12` symbol from an in-memory ELF32 image,
/// in symbol-table order.
///
/// # Errors
///
/// Returns an [`ImageLoadError`] describing the first structural problem.
pub fn parse_function_symbols(bytes: &[u8]) -> Result<Vec<FunctionSymbol>, ImageLoadError> {
    let ident = bytes
        .get(..EHDR_SIZE)
        .ok_or(ImageLoadError::Truncated { what: "ELF header" })?;
    if ident[..4] != ELF_MAGIC {
        return Err(ImageLoadError::BadMagic);
    }
    if ident[EI_CLASS] != ELFCLASS32 {
        return Err(ImageLoadError::UnsupportedClass(ident[EI_CLASS]));
    }
    let endian = match ident[EI_DATA] {
        ELFDATA2LSB => Endian::Little,
        ELFDATA2MSB => Endian::Big,
        other => return Err(ImageLoadError::UnsupportedEncoding(other)),
    };
    let reader = Reader { bytes, endian };

    let entry_size = reader.read_u16(E_SHENTSIZE, "ELF header")?;
    if usize::from(entry_size) != SHDR_SIZE {
        return Err(ImageLoadError::BadSectionEntrySize(entry_size));
    }
    let table_offset = to_usize(reader.read_u32(E_SHOFF, "ELF header")?);
    let count = usize::from(reader.read_u16(E_SHNUM, "ELF header")?);

    let sections = (0..count)
        .map(|index| read_section(&reader, table_offset, index))
        .collect::<Result<Vec<_>, _>>()?;

    let symtab = sections
        .iter()
        .find(|section| section.kind == SHT_SYMTAB)
        .ok_or(ImageLoadError::MissingSymbolTable)?;
    let strtab = sections
        .get(symtab.link)
        .filter(|section| section.kind == SHT_STRTAB)
        .or_else(|| sections.iter().find(|section| section.kind == SHT_STRTAB))
        .ok_or(ImageLoadError::MissingStringTable)?;
    let names = reader.slice(strtab.offset, strtab.size, "string table")?;

    let mut symbols = Vec::new();
    for index in 0..symtab.size / SYM_SIZE {
        let base = symtab
            .offset
            .checked_add(index * SYM_SIZE)
            .ok_or(ImageLoadError::Truncated { what: "symbol" })?;
        let info = reader.slice(base + ST_INFO, 1, "symbol")?[0];
        if info != GLOBAL_FUNCTION_INFO {
            continue;
        }
        let name_offset = reader.read_u32(base + ST_NAME, "symbol")?;
        let address = reader.read_u32(base + ST_VALUE, "symbol")?;
        let name = read_name(names, name_offset)?;
        debug!("function symbol {name} at 0x{address:x}");
        symbols.push(FunctionSymbol { name, address });
    }
    Ok(symbols)
}

fn read_section(reader: &Reader<'_>, table_offset: usize, index: usize) -> Result<Section, ImageLoadError> {
    let base = index
        .checked_mul(SHDR_SIZE)
        .and_then(|relative| table_offset.checked_add(relative))
        .ok_or(ImageLoadError::Truncated {
            what: "section header",
        })?;
    reader.slice(base, SHDR_SIZE, "section header")?;
    Ok(Section {
        kind: reader.read_u32(base + SH_TYPE, "section header")?,
        offset: to_usize(reader.read_u32(base + SH_OFFSET, "section header")?),
        size: to_usize(reader.read_u32(base + SH_SIZE, "section header")?),
        link: to_usize(reader.read_u32(base + SH_LINK, "section header")?),
    })
}

fn read_name(names: &[u8], offset: u32) -> Result<String, ImageLoadError> {
    let tail = names
        .get(to_usize(offset)..)
        .ok_or(ImageLoadError::NameOutOfBounds(offset))?;
    let end = tail
        .iter()
        .position(|&byte| byte == 0)
        .ok_or(ImageLoadError::NameOutOfBounds(offset))?;
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

fn to_usize(value: u32) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[doc(hidden)]
pub mod fixture {
    //! Synthetic ELF32 images for tests and fuzzing.
    //!
    //! Layout: ELF header, `.strtab`, `.symtab`, optional decoy string
    //! table, then the section headers. The symbol table header is always
    //! second to last and the string table header last.

    use crate::Word;

    /// `(name, address, st_info)`
    pub type RawSymbol<'a> = (&'a str, Word, u8);

    /// `st_info` of a global function.
    pub const GLOBAL_FUNCTION: u8 = 0x12;

    /// Shape of a synthetic image.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ImageLayout {
        /// Encode every field big-endian.
        pub big_endian: bool,
        /// Place an unrelated string table and a `.text` header ahead of
        /// the symbol table, so only `sh_link` leads to the right names.
        pub decoy_string_table: bool,
    }

    /// Little-endian image with a null section, `.symtab` and `.strtab`.
    #[must_use]
    pub fn image(symbols: &[RawSymbol<'_>]) -> Vec<u8> {
        build(symbols, ImageLayout::default())
    }

    /// Same layout as [`image`] with big-endian fields.
    #[must_use]
    pub fn image_big_endian(symbols: &[RawSymbol<'_>]) -> Vec<u8> {
        build(
            symbols,
            ImageLayout {
                big_endian: true,
                ..ImageLayout::default()
            },
        )
    }

    /// Builds an image of `symbols` in the given layout.
    ///
    /// # Panics
    ///
    /// Panics if a table grows past 4 GiB.
    #[must_use]
    pub fn build(symbols: &[RawSymbol<'_>], layout: ImageLayout) -> Vec<u8> {
        let big = layout.big_endian;
        let u16b = |v: u16| if big { v.to_be_bytes() } else { v.to_le_bytes() };
        let u32b = |v: u32| if big { v.to_be_bytes() } else { v.to_le_bytes() };
        let word = |len: usize| u32::try_from(len).expect("table fits a 32-bit image");

        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; 16];
        for (name, address, info) in symbols {
            symtab.extend_from_slice(&u32b(word(strtab.len())));
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
            symtab.extend_from_slice(&u32b(*address));
            symtab.extend_from_slice(&u32b(0));
            symtab.push(*info);
            symtab.push(0);
            symtab.extend_from_slice(&u16b(1));
        }
        let decoy: &[u8] = if layout.decoy_string_table {
            b"\0decoy\0"
        } else {
            &[]
        };

        let strtab_offset = 52u32;
        let symtab_offset = strtab_offset + word(strtab.len());
        let decoy_offset = symtab_offset + word(symtab.len());
        let shoff = decoy_offset + word(decoy.len());
        let section_count: u16 = if layout.decoy_string_table { 5 } else { 3 };

        let mut out = vec![0u8; 52];
        out[..4].copy_from_slice(b"\x7fELF");
        out[4] = 1;
        out[5] = if big { 2 } else { 1 };
        out[6] = 1;
        out[32..36].copy_from_slice(&u32b(shoff));
        out[46..48].copy_from_slice(&u16b(40));
        out[48..50].copy_from_slice(&u16b(section_count));
        out.extend_from_slice(&strtab);
        out.extend_from_slice(&symtab);
        out.extend_from_slice(decoy);

        let section = |kind: u32, offset: u32, size: usize, link: u16| {
            let mut header = [0u8; 40];
            header[4..8].copy_from_slice(&u32b(kind));
            header[16..20].copy_from_slice(&u32b(offset));
            header[20..24].copy_from_slice(&u32b(word(size)));
            header[24..28].copy_from_slice(&u32b(u32::from(link)));
            header
        };
        out.extend_from_slice(&[0u8; 40]);
        if layout.decoy_string_table {
            out.extend_from_slice(&section(3, decoy_offset, decoy.len(), 0));
            out.extend_from_slice(&section(1, 0, 0, 0));
        }
        out.extend_from_slice(&section(2, symtab_offset, symtab.len(), section_count - 1));
        out.extend_from_slice(&section(3, strtab_offset, strtab.len(), 0));
        out
    }
}
