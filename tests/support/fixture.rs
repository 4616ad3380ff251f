//! On-disk RPM-MD repositories for integration tests.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mirror_core::{
    ContentStore, Deduplicator, Downloader, FailurePolicy, HttpClient, LinkMode, Mirror,
    MirrorOptions, RetryPolicy,
};
use sha2::{Digest, Sha256};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A package or delta to publish in a fixture repository.
#[derive(Debug, Clone)]
pub struct FixtureFile {
    pub location: String,
    pub arch: String,
    pub content: Vec<u8>,
}

impl FixtureFile {
    pub fn binary(name: &str, content: impl Into<Vec<u8>>) -> Self {
        Self {
            location: format!("x86_64/{name}-1.0-1.x86_64.rpm"),
            arch: "x86_64".to_string(),
            content: content.into(),
        }
    }

    pub fn source(name: &str, content: impl Into<Vec<u8>>) -> Self {
        Self {
            location: format!("src/{name}-1.0-1.src.rpm"),
            arch: "src".to_string(),
            content: content.into(),
        }
    }

    pub fn delta(name: &str, content: impl Into<Vec<u8>>) -> Self {
        Self {
            location: format!("drpms/{name}-0.9_1.0.x86_64.drpm"),
            arch: "x86_64".to_string(),
            content: content.into(),
        }
    }
}

/// `count` binary packages whose content is derived from `tag` and the index.
pub fn binary_packages(count: usize, tag: &str) -> Vec<FixtureFile> {
    (0..count)
        .map(|i| FixtureFile::binary(&format!("pkg{i}"), format!("{tag}-payload-{i}").into_bytes()))
        .collect()
}

/// A repository tree written beneath `root`.
#[derive(Debug, Clone)]
pub struct RepoFixture {
    pub root: PathBuf,
    pub packages: Vec<FixtureFile>,
    pub deltas: Vec<FixtureFile>,
    /// Locations of the metadata documents listed by the index.
    pub metadata_locations: Vec<String>,
}

impl RepoFixture {
    /// Writes packages, deltas and metadata (gzipped primary and deltainfo,
    /// a plain filelists document and the index).
    pub fn write(root: &Path, packages: Vec<FixtureFile>, deltas: Vec<FixtureFile>) -> Self {
        for file in packages.iter().chain(deltas.iter()) {
            write_file(&root.join(&file.location), &file.content);
        }

        let mut entries = Vec::new();
        entries.push(("primary", write_gz_document(root, "primary", &primary_xml(&packages))));
        if !deltas.is_empty() {
            entries.push(("deltainfo", write_gz_document(root, "deltainfo", &deltainfo_xml(&deltas))));
        }
        let filelists = b"<filelists packages=\"0\"></filelists>".to_vec();
        let filelists_location = format!("repodata/{}-filelists.xml", sha256_hex(&filelists));
        write_file(&root.join(&filelists_location), &filelists);
        entries.push(("filelists", (filelists_location, filelists)));

        write_file(&root.join("repodata/repomd.xml"), repomd_xml(&entries).as_bytes());

        Self {
            root: root.to_path_buf(),
            packages,
            deltas,
            metadata_locations: entries.into_iter().map(|(_, (location, _))| location).collect(),
        }
    }

    /// Adds `repomd.xml.key` and `repomd.xml.asc`.
    pub fn with_signatures(self) -> Self {
        write_file(&self.root.join("repodata/repomd.xml.key"), b"-----BEGIN PGP PUBLIC KEY BLOCK-----");
        write_file(&self.root.join("repodata/repomd.xml.asc"), b"-----BEGIN PGP SIGNATURE-----");
        self
    }

    /// Publishes license files in `../product.license/` with a `directory.yast`.
    pub fn with_licenses(self, files: &[(&str, &str)]) -> Self {
        let license_root = self.root.parent().expect("fixture root has a parent").join("product.license");
        let mut manifest = String::from("directory.yast\n");
        for (name, body) in files {
            write_file(&license_root.join(name), body.as_bytes());
            manifest.push_str(name);
            manifest.push('\n');
        }
        write_file(&license_root.join("directory.yast"), manifest.as_bytes());
        self
    }

    /// The primary document this fixture was written with.
    pub fn primary_document(&self) -> String {
        primary_xml(&self.packages)
    }

    /// Publishes `xml` as the primary document and rewrites the index to
    /// list it; the other documents are kept.
    pub fn replace_primary(mut self, xml: &str) -> Self {
        let mut entries = vec![("primary", write_gz_document(&self.root, "primary", xml))];
        for location in self.metadata_locations.iter().skip(1) {
            let kind = if location.contains("deltainfo") { "deltainfo" } else { "filelists" };
            let bytes = std::fs::read(self.root.join(location)).expect("metadata document exists");
            entries.push((kind, (location.clone(), bytes)));
        }
        write_file(&self.root.join("repodata/repomd.xml"), repomd_xml(&entries).as_bytes());
        self.metadata_locations = entries.into_iter().map(|(_, (location, _))| location).collect();
        self
    }

    pub fn file_url(&self) -> String {
        url::Url::from_directory_path(&self.root)
            .expect("fixture root is absolute")
            .to_string()
    }

    pub fn index_bytes(&self) -> Vec<u8> {
        std::fs::read(self.root.join("repodata/repomd.xml")).expect("index exists")
    }
}

/// Serves every file under `root` at `{prefix}/{relative path}`.
pub async fn serve_tree(server: &MockServer, root: &Path, prefix: &str) {
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).expect("readable fixture dir") {
            let entry = entry.expect("fixture entry");
            let entry_path = entry.path();
            if entry_path.is_dir() {
                pending.push(entry_path);
                continue;
            }
            let relative = entry_path
                .strip_prefix(root)
                .expect("entry below root")
                .to_string_lossy()
                .replace('\\', "/");
            Mock::given(method("GET"))
                .and(path(format!("{prefix}/{relative}")))
                .respond_with(
                    ResponseTemplate::new(200).set_body_bytes(std::fs::read(&entry_path).expect("fixture bytes")),
                )
                .mount(server)
                .await;
        }
    }
}

/// Requests received whose path ends with `suffix`.
pub async fn requests_ending_with(server: &MockServer, suffix: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().ends_with(suffix))
        .count()
}

/// Mirror with fast retries, suitable for tests.
pub fn test_mirror(store: &Path, scratch: &Path, failure_policy: FailurePolicy) -> Mirror {
    let downloader = Downloader::new(
        HttpClient::new_with_timeouts(5, 30),
        RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50), 2.0),
        4,
    )
    .expect("valid concurrency");
    Mirror::new(
        downloader,
        Deduplicator::new(ContentStore::new(store), LinkMode::HardLink),
        MirrorOptions {
            scratch_base: Some(scratch.to_path_buf()),
            failure_policy,
        },
    )
}

/// Names of entries in `dir` (empty when it does not exist).
pub fn dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Every file below `dir` whose name ends with `.part`.
pub fn part_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                pending.push(entry_path);
            } else if entry_path.to_string_lossy().ends_with(".part") {
                found.push(entry_path);
            }
        }
    }
    found
}

fn write_file(path: &Path, bytes: &[u8]) {
    std::fs::create_dir_all(path.parent().expect("file has a parent")).expect("create fixture dir");
    std::fs::write(path, bytes).expect("write fixture file");
}

fn write_gz_document(root: &Path, kind: &str, xml: &str) -> (String, Vec<u8>) {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(xml.as_bytes()).expect("gzip fixture");
    let bytes = encoder.finish().expect("gzip fixture");
    let location = format!("repodata/{}-{kind}.xml.gz", sha256_hex(&bytes));
    write_file(&root.join(&location), &bytes);
    (location, bytes)
}

fn primary_xml(packages: &[FixtureFile]) -> String {
    let mut xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata xmlns=\"http://linux.duke.edu/metadata/common\" xmlns:rpm=\"http://linux.duke.edu/metadata/rpm\" packages=\"{}\">\n",
        packages.len()
    );
    for (i, package) in packages.iter().enumerate() {
        xml.push_str(&format!(
            r#"<package type="rpm">
  <name>pkg{i}</name>
  <arch>{arch}</arch>
  <version epoch="0" ver="1.0" rel="1"/>
  <checksum type="sha256" pkgid="YES">{digest}</checksum>
  <size package="{size}" installed="{size}" archive="{size}"/>
  <location href="{location}"/>
  <format><rpm:license>MIT</rpm:license></format>
</package>
"#,
            arch = package.arch,
            digest = sha256_hex(&package.content),
            size = package.content.len(),
            location = package.location,
        ));
    }
    xml.push_str("</metadata>\n");
    xml
}

fn deltainfo_xml(deltas: &[FixtureFile]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<deltainfo>\n");
    for (i, delta) in deltas.iter().enumerate() {
        xml.push_str(&format!(
            r#"<newpackage name="pkg{i}" epoch="0" version="1.0" release="1" arch="{arch}">
  <delta oldepoch="0" oldversion="0.9" oldrelease="1">
    <filename>{location}</filename>
    <sequence>pkg{i}-0.9-1-abcdef</sequence>
    <size>{size}</size>
    <checksum type="sha256">{digest}</checksum>
  </delta>
</newpackage>
"#,
            arch = delta.arch,
            location = delta.location,
            size = delta.content.len(),
            digest = sha256_hex(&delta.content),
        ));
    }
    xml.push_str("</deltainfo>\n");
    xml
}

fn repomd_xml(entries: &[(&str, (String, Vec<u8>))]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<repomd xmlns=\"http://linux.duke.edu/metadata/repo\">\n  <revision>1700000000</revision>\n",
    );
    for (data_type, (location, bytes)) in entries {
        xml.push_str(&format!(
            r#"  <data type="{data_type}">
    <checksum type="sha256">{digest}</checksum>
    <open-checksum type="sha256">{open}</open-checksum>
    <location href="{location}"/>
    <timestamp>1700000000</timestamp>
    <size>{size}</size>
  </data>
"#,
            digest = sha256_hex(bytes),
            open = "0".repeat(64),
            size = bytes.len(),
        ));
    }
    xml.push_str("</repomd>\n");
    xml
}
