// tests/integration_test.rs

//! Integration tests for debforge
//!
//! These tests build throw-away dpkg trees and drive the public API end to
//! end: session handles, listing, rebuild batches and the produced archives.

use debforge::control::parse_stanzas;
use debforge::packages::dependency::{Dependency, DependencySpec, Relation};
use debforge::rebuild::bundle::bundle;
use debforge::rebuild::{NullSink, RecordingSink};
use debforge::{
    BatchStatus, Database, Error, ProgressEvent, RebuildOptions, RebuildResult, Rebuilder,
    Selection, Session, SortOrder,
};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

const STATUS: &str = "\
Package: zlib1g
Version: 1:1.2.13.dfsg-1
Architecture: amd64
Multi-Arch: same
Priority: optional
Section: libs
Description: compression library - runtime
 zlib is a library implementing the deflate compression method.
Status: install ok installed

Package: curl
Version: 7.88.1-10
Architecture: amd64
Depends: libc6 (>= 2.34), zlib1g (>= 1:1.1.4)
Section: web
Status: install ok installed

Package: broken
Version: 0.1
Architecture: all
Status: install ok installed

Package: docs
Version: 2.0
Architecture: all
Section: doc
Status: install ok installed
";

/// dpkg tree with four packages; `broken` has no file list
fn fixture() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    let info = root.path().join("var/lib/dpkg/info");
    fs::create_dir_all(&info).unwrap();
    fs::write(root.path().join("var/lib/dpkg/status"), STATUS).unwrap();

    fs::write(
        info.join("zlib1g:amd64.list"),
        "/.\n/usr\n/usr/lib\n/usr/lib/libz.so.1\n",
    )
    .unwrap();
    fs::write(info.join("zlib1g:amd64.shlibs"), "libz 1 zlib1g (>= 1:1.1.4)\n").unwrap();
    fs::write(info.join("curl.list"), "/.\n/usr\n/usr/bin\n/usr/bin/curl\n").unwrap();
    fs::write(
        info.join("docs.list"),
        "/.\n/usr\n/usr/share\n/usr/share/doc\n/usr/share/doc/README\n/usr/share/doc/gone\n",
    )
    .unwrap();

    fs::create_dir_all(root.path().join("usr/lib")).unwrap();
    fs::create_dir_all(root.path().join("usr/bin")).unwrap();
    fs::create_dir_all(root.path().join("usr/share/doc")).unwrap();
    fs::write(root.path().join("usr/lib/libz.so.1"), b"\x7fELF zlib").unwrap();
    fs::write(root.path().join("usr/bin/curl"), b"\x7fELF curl").unwrap();
    fs::write(root.path().join("usr/share/doc/README"), "read me\n").unwrap();

    root
}

fn ar_member(path: &Path, name: &str) -> Vec<u8> {
    let mut archive = ar::Archive::new(File::open(path).unwrap());
    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.unwrap();
        if entry.header().identifier() == name.as_bytes() {
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            return content;
        }
    }
    panic!("{} has no member {}", path.display(), name);
}

fn tar_files(gz: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut archive = tar::Archive::new(GzDecoder::new(gz));
    let mut files = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().to_string();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        files.insert(path, content);
    }
    files
}

#[test]
fn test_two_stanza_dependency_example() {
    let stanzas = parse_stanzas(b"Package: a\nDepends: b (>= 1.0), c | d\n\nPackage: b\n").unwrap();
    assert_eq!(stanzas.len(), 2);

    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("var/lib/dpkg")).unwrap();
    fs::write(
        root.path().join("var/lib/dpkg/status"),
        "Package: a\nDepends: b (>= 1.0), c | d\n\nPackage: b\n",
    )
    .unwrap();

    let db = Database::open(root.path(), false).unwrap();
    let a = db.get("a").unwrap();
    assert_eq!(
        a.dependencies(),
        [
            DependencySpec::Single(Dependency::versioned("b", Relation::LaterOrEqual, "1.0")),
            DependencySpec::AnyOf(vec![Dependency::bare("c"), Dependency::bare("d")]),
        ]
    );
    assert_eq!(
        a.dependencies()[0].alternatives()[0]
            .constraint
            .as_ref()
            .unwrap()
            .to_string(),
        ">=1.0"
    );
    assert!(db.get("b").unwrap().dependencies().is_empty());
}

#[test]
fn test_listing_through_session() {
    let root = fixture();
    let mut session = Session::new();
    let handle = session.open(root.path(), false).unwrap();

    let unsorted: Vec<String> = session
        .list_packages(handle, SortOrder::Unsorted)
        .unwrap()
        .into_iter()
        .map(|r| session.package(r).unwrap().identifier().to_string())
        .collect();
    assert_eq!(unsorted, ["zlib1g:amd64", "curl", "broken", "docs"]);

    let sorted: Vec<String> = session
        .list_packages(handle, SortOrder::ByIdentifier)
        .unwrap()
        .into_iter()
        .map(|r| session.package(r).unwrap().identifier().to_string())
        .collect();
    let mut expected = unsorted.clone();
    expected.sort();
    assert_eq!(sorted, expected);

    let curl = session.package(session.find(handle, "curl").unwrap()).unwrap();
    assert_eq!(curl.section(), "web");
    assert_eq!(curl.dependencies(), ["libc6", "zlib1g"]);
    assert_eq!(curl.field("Homepage"), "");

    session.close(handle).unwrap();
    assert!(matches!(
        session.list_packages(handle, SortOrder::Unsorted),
        Err(Error::StaleHandle)
    ));
}

#[test]
fn test_partial_failure_batch() {
    let root = fixture();
    let out = tempfile::tempdir().unwrap();
    let mut session = Session::new();
    let handle = session.open(root.path(), true).unwrap();
    let refs = session.list_packages(handle, SortOrder::Unsorted).unwrap();

    let mut sink = RecordingSink::new();
    let report = session
        .rebuild(handle, &refs, &RebuildOptions::new(out.path()), &mut sink)
        .unwrap();

    assert_eq!(report.status, BatchStatus::PartialSuccess);
    assert_eq!(report.results.len(), 4);
    let failed: Vec<_> = report.failed().map(|r| r.package()).collect();
    assert_eq!(failed, ["broken"]);

    let expected_files = [
        "zlib1g_1.2.13.dfsg-1_amd64.deb",
        "curl_7.88.1-10_amd64.deb",
        "docs_2.0_all.deb",
    ];
    for name in expected_files {
        assert!(out.path().join(name).is_file(), "{} not written", name);
    }
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 3);

    assert_eq!(sink.events.last(), Some(&ProgressEvent::AllFinished));
    let all_finished = sink
        .events
        .iter()
        .filter(|e| **e == ProgressEvent::AllFinished)
        .count();
    assert_eq!(all_finished, 1);
    assert_eq!(sink.total_increment(), 4);
}

#[test]
fn test_rebuilt_archive_round_trips_control() {
    let root = fixture();
    let out = tempfile::tempdir().unwrap();
    let db = Database::open(root.path(), false).unwrap();

    let report = Rebuilder::new(&db, RebuildOptions::new(out.path()))
        .rebuild(&["zlib1g:amd64"], &mut NullSink);
    let path = report.results[0].output_path().unwrap().to_path_buf();

    assert_eq!(ar_member(&path, "debian-binary"), b"2.0\n");

    let control = tar_files(&ar_member(&path, "control.tar.gz"));
    let stanzas = parse_stanzas(&control["control"]).unwrap();
    assert_eq!(&stanzas[0].fields, db.get("zlib1g:amd64").unwrap().fields());
    assert_eq!(control["shlibs"], b"libz 1 zlib1g (>= 1:1.1.4)\n");
    assert!(String::from_utf8_lossy(&control["md5sums"]).ends_with("  usr/lib/libz.so.1\n"));

    let data = tar_files(&ar_member(&path, "data.tar.gz"));
    assert_eq!(data["usr/lib/libz.so.1"], b"\x7fELF zlib");
}

#[test]
fn test_missing_files_are_warnings() {
    let root = fixture();
    let out = tempfile::tempdir().unwrap();
    let db = Database::open(root.path(), false).unwrap();
    let mut sink = RecordingSink::new();

    let report = Rebuilder::new(&db, RebuildOptions::new(out.path())).rebuild(&["docs"], &mut sink);

    assert_eq!(report.status, BatchStatus::AllSucceeded);
    let RebuildResult::Success { warnings, .. } = &report.results[0] else {
        panic!("docs failed: {:?}", report.results[0]);
    };
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("/usr/share/doc/gone"));

    let path = report.results[0].output_path().unwrap();
    let data = tar_files(&ar_member(path, "data.tar.gz"));
    assert!(data.contains_key("usr/share/doc/README"));
    assert!(!data.contains_key("usr/share/doc/gone"));
}

#[test]
fn test_empty_request() {
    let root = fixture();
    let out = tempfile::tempdir().unwrap();
    let mut session = Session::new();
    let handle = session.open(root.path(), false).unwrap();

    let mut sink = RecordingSink::new();
    let report = session
        .rebuild(handle, &[], &RebuildOptions::new(out.path()), &mut sink)
        .unwrap();

    assert_eq!(report.status, BatchStatus::NothingRequested);
    assert!(report.results.is_empty());
    assert_eq!(sink.events, [ProgressEvent::AllFinished]);
}

#[test]
fn test_rebuild_is_idempotent() {
    let root = fixture();
    let out = tempfile::tempdir().unwrap();
    let db = Database::open(root.path(), false).unwrap();
    let rebuilder = Rebuilder::new(&db, RebuildOptions::new(out.path()));

    let first = rebuilder.rebuild(&["curl"], &mut NullSink);
    let path = first.results[0].output_path().unwrap().to_path_buf();
    let first_control = ar_member(&path, "control.tar.gz");

    let second = rebuilder.rebuild(&["curl"], &mut NullSink);
    assert_eq!(ar_member(&path, "control.tar.gz"), first_control);
    assert_eq!(first, second);
}

#[test]
fn test_pool_size_does_not_change_results() {
    let root = fixture();
    let db = Database::open(root.path(), false).unwrap();
    let requested = ["docs", "broken", "curl", "nope", "zlib1g:amd64", "curl"];

    let serial_out = tempfile::tempdir().unwrap();
    let parallel_out = tempfile::tempdir().unwrap();

    let serial = Rebuilder::new(&db, RebuildOptions::new(serial_out.path()).workers(1))
        .rebuild(&requested, &mut NullSink);
    let parallel = Rebuilder::new(&db, RebuildOptions::new(parallel_out.path()).workers(8))
        .rebuild(&requested, &mut NullSink);

    assert_eq!(serial.status, parallel.status);
    assert_eq!(serial.results.len(), requested.len());
    assert_eq!(serial.results[5], serial.results[2]);

    for (a, b) in serial.results.iter().zip(&parallel.results) {
        assert_eq!(a.package(), b.package());
        match (a, b) {
            (
                RebuildResult::Success {
                    output_path: pa,
                    sha256: ha,
                    warnings: wa,
                    ..
                },
                RebuildResult::Success {
                    output_path: pb,
                    sha256: hb,
                    warnings: wb,
                    ..
                },
            ) => {
                assert_eq!(pa.file_name(), pb.file_name());
                assert_eq!(ha, hb);
                assert_eq!(wa, wb);
            }
            (
                RebuildResult::Failure { message: ma, .. },
                RebuildResult::Failure { message: mb, .. },
            ) => assert_eq!(ma, mb),
            _ => panic!("results differ for {}", a.package()),
        }
    }
}

#[test]
fn test_duplicate_requests_keep_every_slot() {
    let root = fixture();
    let out = tempfile::tempdir().unwrap();
    let db = Database::open(root.path(), false).unwrap();
    let mut sink = RecordingSink::new();

    let report = Rebuilder::new(&db, RebuildOptions::new(out.path()).workers(4))
        .rebuild(&["curl", "docs", "curl"], &mut sink);

    let order: Vec<_> = report.results.iter().map(|r| r.package()).collect();
    assert_eq!(order, ["curl", "docs", "curl"]);
    assert_eq!(report.results[2], report.results[0]);
    assert_eq!(report.status, BatchStatus::AllSucceeded);

    let started = sink
        .for_package("curl")
        .filter(|e| matches!(e, ProgressEvent::Started { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(sink.total_increment(), 2);
}

#[test]
fn test_default_selection_rebuilds_leaves_into_bundle() {
    let root = fixture();
    let out = tempfile::tempdir().unwrap();
    let db = Database::open(root.path(), true).unwrap();

    let requested = Selection::default().identifiers(&db);
    assert_eq!(requested, ["curl", "broken", "docs"]);

    let report =
        Rebuilder::new(&db, RebuildOptions::new(out.path())).rebuild(&requested, &mut NullSink);
    assert_eq!(report.status, BatchStatus::PartialSuccess);

    let target = out.path().join("backup.tar.gz");
    let written = bundle(&report, &target, true).unwrap();
    assert_eq!(written.packages, 2);

    let bundled = tar_files(&fs::read(&target).unwrap());
    let names: Vec<_> = bundled
        .keys()
        .map(|name| name.trim_start_matches("./"))
        .collect();
    assert_eq!(names, ["curl_7.88.1-10_amd64.deb", "docs_2.0_all.deb"]);
    assert!(!out.path().join("curl_7.88.1-10_amd64.deb").exists());

    let left: Vec<_> = fs::read_dir(out.path()).unwrap().collect();
    assert_eq!(left.len(), 1);
}
