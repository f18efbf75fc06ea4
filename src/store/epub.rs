use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::{Content, ContentStore, ItemInfo, basename, is_text_mime, not_found};
use crate::error::{Error, Result};

const MIMETYPE_ENTRY: &str = "mimetype";
const EPUB_MIMETYPE: &[u8] = b"application/epub+zip";

/// A manifest item as stored in the archive.
struct ManifestItem {
    info: ItemInfo,
    /// Full path inside the archive (the "book path").
    path: String,
    content: Content,
    dirty: bool,
}

/// A [`ContentStore`] over an EPUB archive held in memory.
///
/// Items are the OPF manifest entries, addressed by manifest id. Writes stay in
/// memory until [`EpubStore::save`] or [`EpubStore::write_to`] rewrites the archive.
///
/// # Example
///
/// ```no_run
/// use folio::store::{ContentStore, EpubStore};
///
/// let mut store = EpubStore::open("book.epub")?;
/// let id = store.href_to_id("Text/chapter1.xhtml")?;
/// folio::edit(&mut store, &id, |content| {
///     Ok::<_, folio::Error>(content.decode().replace("colour", "color").into())
/// })?;
/// store.save("book-edited.epub")?;
/// # Ok::<(), folio::Error>(())
/// ```
pub struct EpubStore {
    /// Every archive entry in original order, with its original bytes.
    entries: Vec<(String, Vec<u8>)>,
    items: Vec<ManifestItem>,
    by_id: HashMap<String, usize>,
    opf_path: String,
}

impl EpubStore {
    /// Load an EPUB file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_reader(Cursor::new(data))
    }

    /// Load an EPUB from any [`Read`] + [`Seek`] source.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            entries.push((name, data));
        }

        let opf_path = find_opf_path(&entries)?;
        let opf_dir = opf_path
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();
        let opf = entry_text(&entries, &opf_path)?;
        let manifest = parse_manifest(&opf)?;

        let mut items = Vec::with_capacity(manifest.len());
        let mut by_id = HashMap::new();
        for info in manifest {
            let Some((path, data)) = locate(&entries, &opf_dir, &info.href) else {
                tracing::warn!(id = %info.id, href = %info.href, "manifest item missing from archive");
                continue;
            };
            let content = load_content(&info.mimetype, data);
            by_id.insert(info.id.clone(), items.len());
            items.push(ManifestItem {
                info,
                path,
                content,
                dirty: false,
            });
        }

        tracing::debug!(opf = %opf_path, items = items.len(), "loaded epub");
        Ok(Self {
            entries,
            items,
            by_id,
            opf_path,
        })
    }

    /// Path of the OPF package document inside the archive.
    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    /// Whether any item has been written since loading.
    pub fn is_modified(&self) -> bool {
        self.items.iter().any(|i| i.dirty)
    }

    /// Ids of the items written since loading.
    pub fn modified_ids(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|i| i.dirty)
            .map(|i| i.info.id.as_str())
            .collect()
    }

    /// Full archive path of an item.
    pub fn id_to_bookpath(&self, id: &str) -> Result<String> {
        self.item(id).map(|i| i.path.clone())
    }

    /// Write the (possibly edited) archive to disk.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_to(file)?;
        Ok(())
    }

    /// Write the archive to any [`Write`] + [`Seek`] destination.
    ///
    /// Entries keep their original order, except `mimetype`, which is always written
    /// first and uncompressed.
    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<W> {
        let mut zip = ZipWriter::new(writer);

        let options_stored =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let options_deflate =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let replaced: HashMap<&str, &[u8]> = self
            .items
            .iter()
            .filter(|i| i.dirty)
            .map(|i| (i.path.as_str(), i.content.as_bytes()))
            .collect();

        let mimetype = self
            .entries
            .iter()
            .find(|(name, _)| name == MIMETYPE_ENTRY)
            .map_or(EPUB_MIMETYPE, |(_, data)| data.as_slice());
        zip.start_file(MIMETYPE_ENTRY, options_stored)?;
        zip.write_all(mimetype)?;

        for (name, data) in &self.entries {
            if name == MIMETYPE_ENTRY {
                continue;
            }
            let data = replaced
                .get(name.as_str())
                .copied()
                .unwrap_or(data.as_slice());
            zip.start_file(name.as_str(), options_deflate)?;
            zip.write_all(data)?;
        }

        tracing::debug!(replaced = replaced.len(), "wrote epub");
        Ok(zip.finish()?)
    }

    fn item(&self, id: &str) -> Result<&ManifestItem> {
        self.by_id
            .get(id)
            .map(|&idx| &self.items[idx])
            .ok_or_else(|| not_found(id))
    }

    fn find_id(&self, pred: impl Fn(&ManifestItem) -> bool, key: &str) -> Result<String> {
        self.items
            .iter()
            .find(|i| pred(i))
            .map(|i| i.info.id.clone())
            .ok_or_else(|| not_found(key))
    }
}

impl ContentStore for EpubStore {
    fn read(&self, id: &str) -> Result<Content> {
        self.item(id).map(|i| i.content.clone())
    }

    fn write(&mut self, id: &str, content: Content) -> Result<()> {
        let idx = *self.by_id.get(id).ok_or_else(|| not_found(id))?;
        let item = &mut self.items[idx];
        item.content = content;
        item.dirty = true;
        Ok(())
    }

    fn id_to_href(&self, id: &str) -> Result<String> {
        self.item(id).map(|i| i.info.href.clone())
    }

    fn id_to_mime(&self, id: &str) -> Result<String> {
        self.item(id).map(|i| i.info.mimetype.clone())
    }

    fn href_to_id(&self, href: &str) -> Result<String> {
        let decoded = percent_decode(href);
        self.find_id(
            |i| i.info.href == href || percent_decode(&i.info.href) == decoded,
            href,
        )
    }

    fn basename_to_id(&self, name: &str) -> Result<String> {
        self.find_id(|i| basename(&i.info.href) == name, name)
    }

    fn bookpath_to_id(&self, path: &str) -> Result<String> {
        self.find_id(|i| i.path == path, path)
    }

    fn enumerate_all(&self) -> Vec<ItemInfo> {
        self.items.iter().map(|i| i.info.clone()).collect()
    }

    fn enumerate_text(&self) -> Vec<(String, String)> {
        self.items
            .iter()
            .filter(|i| is_text_mime(&i.info.mimetype))
            .map(|i| (i.info.id.clone(), i.info.href.clone()))
            .collect()
    }
}

/// Textual items load as text when they are valid UTF-8; everything else stays bytes.
fn load_content(mimetype: &str, data: &[u8]) -> Content {
    let textual = is_text_mime(mimetype)
        || mimetype.starts_with("text/")
        || mimetype.ends_with("+xml")
        || mimetype.ends_with("/xml");
    if textual && let Ok(text) = std::str::from_utf8(data) {
        return Content::Text(text.to_string());
    }
    Content::Bytes(data.to_vec())
}

fn find_opf_path(entries: &[(String, Vec<u8>)]) -> Result<String> {
    let container = entry_text(entries, "META-INF/container.xml")?;

    let mut reader = Reader::from_str(&container);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        return Ok(String::from_utf8(attr.value.to_vec())?);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Err(Error::InvalidEpub(
        "No rootfile found in container.xml".into(),
    ))
}

/// Read the manifest items, in document order.
fn parse_manifest(opf: &str) -> Result<Vec<ItemInfo>> {
    let mut reader = Reader::from_str(opf);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if local_name(e.name().as_ref()) == b"item" => {
                let mut id = String::new();
                let mut href = String::new();
                let mut media_type = String::new();

                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"id" => id = String::from_utf8(attr.value.to_vec())?,
                        b"href" => href = String::from_utf8(attr.value.to_vec())?,
                        b"media-type" => media_type = String::from_utf8(attr.value.to_vec())?,
                        _ => {}
                    }
                }

                if !id.is_empty() && !href.is_empty() {
                    items.push(ItemInfo::new(id, href, media_type));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }
    Ok(items)
}

fn entry_text(entries: &[(String, Vec<u8>)], path: &str) -> Result<String> {
    let (_, data) = entries
        .iter()
        .find(|(name, _)| name == path)
        .ok_or_else(|| Error::InvalidEpub(format!("missing {path}")))?;
    Ok(String::from_utf8(crate::util::strip_bom(data).to_vec())?)
}

/// Find the archive entry for a manifest href, falling back to the percent-decoded path.
fn locate<'a>(
    entries: &'a [(String, Vec<u8>)],
    opf_dir: &str,
    href: &str,
) -> Option<(String, &'a [u8])> {
    let href = href.split('#').next().unwrap_or(href);
    let direct = resolve_path(opf_dir, href);
    let decoded = percent_decode(&direct);
    [direct, decoded].into_iter().find_map(|path| {
        entries
            .iter()
            .find(|(name, _)| *name == path)
            .map(|(_, data)| (path, data.as_slice()))
    })
}

fn percent_decode(path: &str) -> String {
    percent_encoding::percent_decode_str(path)
        .decode_utf8_lossy()
        .into_owned()
}

/// Join an href onto the OPF directory, collapsing `.` and `..` segments.
fn resolve_path(base: &str, href: &str) -> String {
    let mut segments: Vec<&str> = if base.is_empty() {
        Vec::new()
    } else {
        base.split('/').collect()
    };
    for part in href.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Extract local name from potentially namespaced XML name
fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_name() {
        assert_eq!(local_name(b"opf:item"), b"item");
        assert_eq!(local_name(b"item"), b"item");
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path("OEBPS", "Text/c1.xhtml"), "OEBPS/Text/c1.xhtml");
        assert_eq!(resolve_path("OEBPS/Text", "../Images/a.png"), "OEBPS/Images/a.png");
        assert_eq!(resolve_path("", "./c1.xhtml"), "c1.xhtml");
    }

    #[test]
    fn test_parse_manifest_keeps_order() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf">
  <manifest>
    <item id="b" href="b.xhtml" media-type="application/xhtml+xml"/>
    <opf:item id="a" href="a.css" media-type="text/css"/>
    <item id="broken" media-type="text/css"/>
  </manifest>
</package>"#;
        let items = parse_manifest(opf).unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn test_load_content_kinds() {
        assert!(load_content("application/xhtml+xml", b"<p/>").is_text());
        assert!(load_content("text/css", b"p{}").is_text());
        assert!(!load_content("image/png", b"\x89PNG").is_text());
        assert!(!load_content("application/xhtml+xml", &[0xE9, 0x00]).is_text());
    }
}
