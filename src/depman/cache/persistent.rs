use std::path::Path;

use depman_schemas::encoding::{encode_epoch_key, encode_version_key, VersionKindTag};
use depman_schemas::{Lock, Manifest};
use jiff::Timestamp;
use rusqlite::{params, Connection, OptionalExtension};

use crate::pkgtree::PackageTree;
use crate::version::{PairedVersion, Revision, UnpairedVersion};

use super::{AnalyzerId, SourceCache};

/// An embedded, ordered key-value cache backed by a single SQLite file
/// (§4.4, §6: `bolt.db` or equivalent). Namespaced per source by a
/// `source_url` column rather than literal nested buckets, since SQL
/// relations are the idiomatic equivalent of bbolt's nested-bucket
/// namespacing; the freshness semantics (§8's epoch invariant) are
/// preserved exactly: every mutating write stamps a new epoch row rather
/// than overwriting the previous one, and a read only considers rows whose
/// epoch is at or above the reader's watermark.
pub struct PersistentCache {
    conn: Connection,
    source_url: String,
    read_epoch: [u8; 8],
}

impl PersistentCache {
    pub fn open(path: &Path, source_url: &str, read_epoch: Timestamp) -> rusqlite::Result<PersistentCache> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(1))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS manifest_lock (
                source_url TEXT NOT NULL,
                revision TEXT NOT NULL,
                analyzer_name TEXT NOT NULL,
                analyzer_version TEXT NOT NULL,
                epoch BLOB NOT NULL,
                manifest BLOB NOT NULL,
                lock BLOB NOT NULL,
                PRIMARY KEY (source_url, revision, analyzer_name, analyzer_version, epoch)
            );
            CREATE TABLE IF NOT EXISTS package_tree (
                source_url TEXT NOT NULL,
                revision TEXT NOT NULL,
                epoch BLOB NOT NULL,
                tree BLOB NOT NULL,
                PRIMARY KEY (source_url, revision, epoch)
            );
            CREATE TABLE IF NOT EXISTS version_map (
                source_url TEXT NOT NULL,
                version_key BLOB NOT NULL,
                revision TEXT NOT NULL,
                epoch BLOB NOT NULL,
                PRIMARY KEY (source_url, version_key, epoch)
            );
            CREATE TABLE IF NOT EXISTS revision_exists (
                source_url TEXT NOT NULL,
                revision TEXT NOT NULL,
                epoch BLOB NOT NULL,
                PRIMARY KEY (source_url, revision, epoch)
            );
            ",
        )?;
        Ok(PersistentCache {
            conn,
            source_url: source_url.to_string(),
            read_epoch: encode_epoch_key(read_epoch),
        })
    }

    fn write_epoch() -> [u8; 8] {
        encode_epoch_key(Timestamp::now())
    }

    fn kind_tag_and_text(uv: &UnpairedVersion) -> (VersionKindTag, String) {
        match uv {
            UnpairedVersion::Branch { name, .. } => (VersionKindTag::Branch, name.clone()),
            UnpairedVersion::Semver(v) => (VersionKindTag::Semver, v.to_string()),
            UnpairedVersion::Plain(s) => (VersionKindTag::Plain, s.clone()),
        }
    }
}

impl SourceCache for PersistentCache {
    fn set_manifest_and_lock(&mut self, rev: &Revision, analyzer: AnalyzerId<'_>, manifest: &Manifest, lock: &Lock) {
        let manifest_blob = serde_json::to_vec(manifest).expect("Manifest always serializes");
        let lock_blob = serde_json::to_vec(lock).expect("Lock always serializes");
        let _ = self.conn.execute(
            "INSERT OR REPLACE INTO manifest_lock (source_url, revision, analyzer_name, analyzer_version, epoch, manifest, lock)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![self.source_url, rev.0, analyzer.0, analyzer.1, Self::write_epoch().to_vec(), manifest_blob, lock_blob],
        );
    }

    fn get_manifest_and_lock(&self, rev: &Revision, analyzer: AnalyzerId<'_>) -> Option<(Manifest, Lock)> {
        let row: Option<(Vec<u8>, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT manifest, lock FROM manifest_lock
                 WHERE source_url = ?1 AND revision = ?2 AND analyzer_name = ?3 AND analyzer_version = ?4 AND epoch >= ?5
                 ORDER BY epoch DESC LIMIT 1",
                params![self.source_url, rev.0, analyzer.0, analyzer.1, self.read_epoch.to_vec()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .ok()
            .flatten();
        let (manifest_blob, lock_blob) = row?;
        let manifest = serde_json::from_slice(&manifest_blob).ok()?;
        let lock = serde_json::from_slice(&lock_blob).ok()?;
        Some((manifest, lock))
    }

    fn set_package_tree(&mut self, rev: &Revision, tree: &PackageTree) {
        let blob = serde_json::to_vec(tree).expect("PackageTree always serializes");
        let _ = self.conn.execute(
            "INSERT OR REPLACE INTO package_tree (source_url, revision, epoch, tree) VALUES (?1, ?2, ?3, ?4)",
            params![self.source_url, rev.0, Self::write_epoch().to_vec(), blob],
        );
    }

    fn get_package_tree(&self, rev: &Revision) -> Option<PackageTree> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT tree FROM package_tree
                 WHERE source_url = ?1 AND revision = ?2 AND epoch >= ?3
                 ORDER BY epoch DESC LIMIT 1",
                params![self.source_url, rev.0, self.read_epoch.to_vec()],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten();
        blob.and_then(|b| serde_json::from_slice(&b).ok())
    }

    fn set_version_map(&mut self, versions: &[PairedVersion]) {
        let epoch = Self::write_epoch().to_vec();
        let tx = match self.conn.transaction() {
            Ok(tx) => tx,
            Err(_) => return,
        };
        for v in versions {
            let (kind, text) = Self::kind_tag_and_text(v.unpaired());
            let key = encode_version_key(kind, &text);
            let _ = tx.execute(
                "INSERT OR REPLACE INTO version_map (source_url, version_key, revision, epoch) VALUES (?1, ?2, ?3, ?4)",
                params![self.source_url, key, v.revision().0, epoch],
            );
        }
        let _ = tx.commit();
    }

    fn get_all_versions(&self) -> Vec<PairedVersion> {
        let mut stmt = match self.conn.prepare(
            "SELECT version_key, revision, MAX(epoch) FROM version_map
             WHERE source_url = ?1 AND epoch >= ?2 GROUP BY version_key",
        ) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let rows = stmt.query_map(params![self.source_url, self.read_epoch.to_vec()], |row| {
            let key: Vec<u8> = row.get(0)?;
            let revision: String = row.get(1)?;
            Ok((key, revision))
        });
        let mut out = Vec::new();
        if let Ok(rows) = rows {
            for row in rows.flatten() {
                let (key, revision) = row;
                if let Some(uv) = decode_unpaired(&key) {
                    out.push(PairedVersion::new(uv, Revision(revision)));
                }
            }
        }
        out
    }

    fn get_versions_for(&self, rev: &Revision) -> Option<Vec<UnpairedVersion>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT version_key, MAX(epoch) FROM version_map
                 WHERE source_url = ?1 AND revision = ?2 AND epoch >= ?3 GROUP BY version_key",
            )
            .ok()?;
        let rows = stmt
            .query_map(params![self.source_url, rev.0, self.read_epoch.to_vec()], |row| {
                let key: Vec<u8> = row.get(0)?;
                Ok(key)
            })
            .ok()?;
        let mut out = Vec::new();
        for key in rows.flatten() {
            if let Some(uv) = decode_unpaired(&key) {
                out.push(uv);
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    fn get_revision_for(&self, uv: &UnpairedVersion) -> Option<Revision> {
        let (kind, text) = Self::kind_tag_and_text(uv);
        let key = encode_version_key(kind, &text);
        self.conn
            .query_row(
                "SELECT revision FROM version_map
                 WHERE source_url = ?1 AND version_key = ?2 AND epoch >= ?3
                 ORDER BY epoch DESC LIMIT 1",
                params![self.source_url, key, self.read_epoch.to_vec()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .ok()
            .flatten()
            .map(Revision)
    }

    fn mark_revision_exists(&mut self, rev: &Revision) {
        let _ = self.conn.execute(
            "INSERT OR REPLACE INTO revision_exists (source_url, revision, epoch) VALUES (?1, ?2, ?3)",
            params![self.source_url, rev.0, Self::write_epoch().to_vec()],
        );
    }

    fn revision_exists(&self, rev: &Revision) -> bool {
        self.conn
            .query_row(
                "SELECT 1 FROM revision_exists WHERE source_url = ?1 AND revision = ?2 AND epoch >= ?3 LIMIT 1",
                params![self.source_url, rev.0, self.read_epoch.to_vec()],
                |_| Ok(()),
            )
            .optional()
            .ok()
            .flatten()
            .is_some()
    }
}

fn decode_unpaired(key: &[u8]) -> Option<UnpairedVersion> {
    use depman_schemas::encoding::decode_version_key;
    let (kind, text) = decode_version_key(key)?;
    Some(match kind {
        VersionKindTag::Branch => UnpairedVersion::Branch {
            name: text.to_string(),
            is_default: false,
        },
        VersionKindTag::Semver => UnpairedVersion::Semver(semver::Version::parse(text).ok()?),
        VersionKindTag::Plain => UnpairedVersion::Plain(text.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cache.db");
        let mut cache = PersistentCache::open(&db, "github.com/a/b", Timestamp::from_second(0).unwrap()).unwrap();
        let rev = Revision("abc123".into());
        cache.set_manifest_and_lock(&rev, ("depman-analyzer", "1"), &Manifest::default(), &Lock::default());
        assert!(cache.get_manifest_and_lock(&rev, ("depman-analyzer", "1")).is_some());
    }

    #[test]
    fn stale_epoch_appears_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cache.db");
        let mut writer = PersistentCache::open(&db, "github.com/a/b", Timestamp::from_second(0).unwrap()).unwrap();
        let rev = Revision("abc123".into());
        writer.mark_revision_exists(&rev);

        let future_reader = PersistentCache::open(
            &db,
            "github.com/a/b",
            Timestamp::from_second(Timestamp::now().as_second() + 3600).unwrap(),
        )
        .unwrap();
        assert!(!future_reader.revision_exists(&rev));

        let past_reader = PersistentCache::open(&db, "github.com/a/b", Timestamp::from_second(0).unwrap()).unwrap();
        assert!(past_reader.revision_exists(&rev));
    }
}
