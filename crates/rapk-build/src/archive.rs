use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use tracing::{debug, warn};
use zip::{
    read::ZipFile,
    write::FileOptions,
    CompressionMethod, ZipArchive, ZipWriter,
};

use crate::{
    error::BuildError,
    manifest::{patch_display_name, PatchOutcome},
};

pub const CONFIG_ENTRY: &str = "assets/config.properties";
pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

/// Body of the redirect configuration entry.
pub fn config_contents(url: &str) -> String {
    format!("url={url}")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewriteReport {
    pub entries: usize,
    /// `None` when the archive has no manifest entry at all.
    pub manifest: Option<PatchOutcome>,
    /// `false` when the config entry had to be appended.
    pub config_replaced: bool,
}

/// Streams `src` into `dst`, replacing the config entry with `url=<url>` and
/// patching the display-name sentinel in the manifest. Every other entry is
/// copied raw, so its compressed bytes, CRC, method and order are preserved.
pub fn rewrite_template(
    src: &Path,
    dst: &Path,
    url: &str,
    display_name: &str,
    sentinel: &str,
) -> Result<RewriteReport, BuildError> {
    let input = File::open(src).map_err(BuildError::io(src))?;
    let mut archive = ZipArchive::new(BufReader::new(input))?;
    let output = File::create(dst).map_err(BuildError::io(dst))?;
    let mut writer = ZipWriter::new(BufWriter::new(output));

    let mut report = RewriteReport {
        entries: archive.len(),
        manifest: None,
        config_replaced: false,
    };

    for index in 0..archive.len() {
        let name = archive.by_index_raw(index)?.name().to_string();
        if name != CONFIG_ENTRY && name != MANIFEST_ENTRY {
            let entry = archive.by_index_raw(index)?;
            writer.raw_copy_file(entry)?;
            continue;
        }

        let mut entry = archive.by_index(index)?;
        let options = entry_options(&entry);
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data).map_err(BuildError::io(src))?;
        drop(entry);

        let data = if name == CONFIG_ENTRY {
            report.config_replaced = true;
            config_contents(url).into_bytes()
        } else {
            let (patched, outcome) = patch_display_name(&data, sentinel, display_name);
            report.manifest = Some(outcome);
            patched
        };

        writer.start_file(name.as_str(), options)?;
        writer.write_all(&data).map_err(BuildError::io(dst))?;
        debug!("rewrote {name} ({} bytes)", data.len());
    }

    if !report.config_replaced {
        warn!("{} has no {CONFIG_ENTRY}; appending one", src.display());
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(CONFIG_ENTRY, options)?;
        writer
            .write_all(config_contents(url).as_bytes())
            .map_err(BuildError::io(dst))?;
        report.entries += 1;
    }

    let mut inner = writer.finish()?;
    inner.flush().map_err(BuildError::io(dst))?;
    Ok(report)
}

fn entry_options(entry: &ZipFile<'_>) -> FileOptions {
    let mut options = FileOptions::default()
        .compression_method(entry.compression())
        .last_modified_time(entry.last_modified());
    if let Some(mode) = entry.unix_mode() {
        options = options.unix_permissions(mode);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{encode_utf16le, APP_NAME_SENTINEL};
    use std::io::Cursor;

    fn build_template(path: &Path, with_config: bool) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);

        let mut manifest = vec![0x03, 0x00, 0x08, 0x00];
        manifest.extend(encode_utf16le(APP_NAME_SENTINEL));
        manifest.extend([0, 0, 0x42]);
        zip.start_file(MANIFEST_ENTRY, deflated).unwrap();
        zip.write_all(&manifest).unwrap();
        zip.start_file("classes.dex", deflated).unwrap();
        zip.write_all(&[0x64, 0x65, 0x78, 0x0a].repeat(64)).unwrap();
        if with_config {
            zip.start_file(CONFIG_ENTRY, deflated).unwrap();
            zip.write_all(b"url=TEMPLATE_URL").unwrap();
        }
        zip.start_file("resources.arsc", stored).unwrap();
        zip.write_all(&[7u8; 512]).unwrap();
        zip.finish().unwrap();
    }

    fn read_entry(path: &Path, name: &str) -> Vec<u8> {
        let bytes = std::fs::read(path).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut out = Vec::new();
        entry.read_to_end(&mut out).unwrap();
        out
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let bytes = std::fs::read(path).unwrap();
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        archive.file_names().map(str::to_string).collect()
    }

    #[test]
    fn rewrites_config_and_manifest_and_keeps_the_rest() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("temp.apk");
        let dst = temp.path().join("unsigned.apk");
        build_template(&src, true);

        let report =
            rewrite_template(&src, &dst, "https://example.com", "MyApp", APP_NAME_SENTINEL)
                .unwrap();

        assert_eq!(report.entries, 4);
        assert!(report.config_replaced);
        assert_eq!(
            report.manifest,
            Some(PatchOutcome::Patched {
                occurrences: 1,
                truncated: false
            })
        );
        assert_eq!(read_entry(&dst, CONFIG_ENTRY), b"url=https://example.com");
        assert_eq!(read_entry(&dst, "resources.arsc"), vec![7u8; 512]);
        assert_eq!(read_entry(&dst, "classes.dex"), read_entry(&src, "classes.dex"));

        let manifest = read_entry(&dst, MANIFEST_ENTRY);
        assert_eq!(manifest.len(), read_entry(&src, MANIFEST_ENTRY).len());
        let name = encode_utf16le("MyApp");
        assert_eq!(&manifest[4..4 + name.len()], name.as_slice());
        assert!(manifest[4 + name.len()..104].iter().all(|b| *b == 0));
        assert_eq!(manifest[106], 0x42);
    }

    #[test]
    fn entry_order_and_methods_are_preserved() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("temp.apk");
        let dst = temp.path().join("unsigned.apk");
        build_template(&src, true);

        rewrite_template(&src, &dst, "https://example.com", "MyApp", APP_NAME_SENTINEL).unwrap();

        assert_eq!(entry_names(&dst), entry_names(&src));
        let bytes = std::fs::read(&dst).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(
            archive.by_name("resources.arsc").unwrap().compression(),
            CompressionMethod::Stored
        );
        assert_eq!(
            archive.by_name(MANIFEST_ENTRY).unwrap().compression(),
            CompressionMethod::Deflated
        );
    }

    #[test]
    fn missing_config_entry_is_appended() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("temp.apk");
        let dst = temp.path().join("unsigned.apk");
        build_template(&src, false);

        let report =
            rewrite_template(&src, &dst, "https://example.org/a?b=c", "X", APP_NAME_SENTINEL)
                .unwrap();

        assert!(!report.config_replaced);
        assert_eq!(report.entries, 4);
        assert_eq!(read_entry(&dst, CONFIG_ENTRY), b"url=https://example.org/a?b=c");
    }

    #[test]
    fn missing_sentinel_still_produces_archive() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("temp.apk");
        let dst = temp.path().join("unsigned.apk");
        build_template(&src, true);

        let report =
            rewrite_template(&src, &dst, "https://example.com", "MyApp", "NOT_IN_THE_MANIFEST")
                .unwrap();

        assert_eq!(report.manifest, Some(PatchOutcome::SentinelMissing));
        assert_eq!(read_entry(&dst, MANIFEST_ENTRY), read_entry(&src, MANIFEST_ENTRY));
        assert_eq!(read_entry(&dst, CONFIG_ENTRY), b"url=https://example.com");
    }

    #[test]
    fn corrupt_template_is_an_archive_error() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("temp.apk");
        std::fs::write(&src, b"not a zip").unwrap();

        let err = rewrite_template(
            &src,
            &temp.path().join("unsigned.apk"),
            "https://example.com",
            "MyApp",
            APP_NAME_SENTINEL,
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Archive(_)));
    }
}
