#![allow(dead_code)]

use std::{
    fs,
    io::{Cursor, Read, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use rapk_build::{ForgeLayout, APP_NAME_SENTINEL};
use rapk_core::{BuildParams, Forge, ForgeConfig, JobSnapshot};
use tempfile::TempDir;
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

pub const POLL: Duration = Duration::from_millis(10);

const FAKE_ZIPALIGN: &str = r#"if [ "$1" = "-c" ]; then exit 0; fi
cp "$3" "$4""#;

// sign --ks K --ks-pass P --out OUT IN
const FAKE_APKSIGNER: &str = r#"if [ "$1" = "verify" ]; then exit 0; fi
cp "$8" "$7""#;

// -jar JAR b TREE -o OUT | -jar JAR d -f -o OUT APK
const FAKE_JAVA: &str = r#"case "$3" in
  b) cat "$4/assets/config.properties" "$4/res/values/strings.xml" > "$6" ;;
  d) mkdir -p "$6/res/values" "$6/assets"
     printf '<resources>\n    <string name="app_name">Template</string>\n</resources>\n' > "$6/res/values/strings.xml"
     printf 'url=TEMPLATE_URL' > "$6/assets/config.properties" ;;
  *) exit 2 ;;
esac"#;

pub struct Fixture {
    pub temp: TempDir,
    pub config: ForgeConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("CORE")).unwrap();
        let config = ForgeConfig {
            core_dir: root.join("CORE"),
            work_dir: root.join("work"),
            output_dir: root.join("FINISHED_HERE"),
            delete_delay_secs: 0,
            record_history: false,
            ..ForgeConfig::default()
        };
        Self { temp, config }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn layout(&self) -> ForgeLayout {
        self.config.layout()
    }

    pub fn forge(&self) -> Forge {
        Forge::new(self.config.clone())
    }

    pub fn build_tools_dir(&self) -> PathBuf {
        self.layout().sdk_dir().join("build-tools/34.0.0")
    }

    /// zipalign, apksigner and the debug keystore.
    pub fn install_toolchain(&self) {
        let tools = self.build_tools_dir();
        write_script(&tools.join("zipalign"), FAKE_ZIPALIGN);
        write_script(&tools.join("apksigner"), FAKE_APKSIGNER);
        fs::write(self.layout().keystore(), b"fake keystore").unwrap();
    }

    pub fn replace_tool(&self, name: &str, body: &str) {
        write_script(&self.build_tools_dir().join(name), body);
    }

    pub fn install_prebuilt_template(&self) {
        let path = self.layout().prebuilt_template();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        write_template_apk(&path, APP_NAME_SENTINEL);
    }

    /// apktool jar placeholder plus a cached JDK whose `java` fakes apktool.
    pub fn install_apktool(&self) {
        fs::write(self.layout().apktool_jar(), b"fake jar").unwrap();
        write_script(&self.layout().jdk_dir().join("bin/java"), FAKE_JAVA);
    }

    pub fn install_decompiled_template(&self) {
        let tree = self.layout().decompiled_template();
        fs::create_dir_all(tree.join("res/values")).unwrap();
        fs::create_dir_all(tree.join("assets")).unwrap();
        fs::write(tree.join("apktool.yml"), "version: 2.9.3\n").unwrap();
        fs::write(
            tree.join("res/values/strings.xml"),
            "<resources>\n    <string name=\"app_name\">Template</string>\n</resources>\n",
        )
        .unwrap();
        fs::write(tree.join("assets/config.properties"), "url=TEMPLATE_URL").unwrap();
    }

    /// Cold-build script that counts its runs and drops a prebuilt-style
    /// package into the output dir under the requested name.
    pub fn install_cold_build_script(&self) -> PathBuf {
        let counter = self.root().join("cold_builds.log");
        let fixture = self.root().join("fixture.apk");
        write_template_apk(&fixture, APP_NAME_SENTINEL);
        let out = self.config.output_dir.clone();
        write_script(
            &self.layout().unix_build_script(),
            &format!(
                "echo \"$@\" >> '{}'\nsleep 0.2\nmkdir -p '{}'\ncp '{}' '{}/'\"$4\"",
                counter.display(),
                out.display(),
                fixture.display(),
                out.display()
            ),
        );
        counter
    }

    pub fn install_build_script(&self, body: &str) {
        write_script(&self.layout().unix_build_script(), body);
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.config.output_dir.join(name)
    }

    /// No job-private leftovers under the work dir.
    pub fn jobs_dir_is_clean(&self) -> bool {
        match fs::read_dir(self.layout().jobs_dir()) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }
}

pub async fn run_to_end(forge: &Forge, params: BuildParams) -> JobSnapshot {
    let job_id = forge.coordinator().submit(params).unwrap();
    tokio::time::timeout(
        Duration::from_secs(30),
        forge.coordinator().wait(&job_id, POLL),
    )
    .await
    .expect("job did not finish")
    .unwrap()
}

pub fn write_script(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

pub fn utf16le(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn pool_record(value: &str) -> Vec<u8> {
    let mut out = (value.encode_utf16().count() as u16).to_le_bytes().to_vec();
    out.extend(utf16le(value));
    out.extend([0, 0]);
    out
}

pub fn manifest_with_label(label: &str) -> Vec<u8> {
    let mut out = vec![0x03, 0x00, 0x08, 0x00, 0x10, 0x02, 0x00, 0x00];
    out.extend(pool_record("com.example.redirect"));
    out.extend(pool_record(label));
    out.extend(pool_record("android.intent.action.MAIN"));
    out.extend([0x02, 0x01, 0x10, 0x00, 0x24, 0x00, 0x00, 0x00]);
    out
}

pub fn write_template_apk(path: &Path, label: &str) {
    let file = fs::File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);

    zip.start_file("AndroidManifest.xml", deflated).unwrap();
    zip.write_all(&manifest_with_label(label)).unwrap();
    zip.start_file("classes.dex", deflated).unwrap();
    zip.write_all(&b"dex\n035\0".repeat(32)).unwrap();
    zip.start_file("assets/config.properties", deflated).unwrap();
    zip.write_all(b"url=TEMPLATE_URL").unwrap();
    zip.start_file("resources.arsc", stored).unwrap();
    zip.write_all(&[0x02, 0x00, 0x0c, 0x00].repeat(64)).unwrap();
    zip.start_file("res/mipmap-hdpi/ic_launcher.png", stored)
        .unwrap();
    zip.write_all(b"\x89PNG\r\n\x1a\n").unwrap();
    zip.finish().unwrap();
}

pub fn read_entry(path: &Path, name: &str) -> Vec<u8> {
    let bytes = fs::read(path).unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut out = Vec::new();
    entry.read_to_end(&mut out).unwrap();
    out
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
