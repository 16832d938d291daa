//! 内存中的目录：已安装包、服务、下载缓存
//!
//! 每个目录保存一个不可变快照 `Arc<CatalogSnapshot<T>>`，写入时整体替换。
//! 读者拿到的快照在替换后保持不变，不会看到更新到一半的目录；
//! 读取是一次原子加载，不会等待正在进行的对齐。

use super::types::{CachedDownload, PackageKind, PackageRecord, ServiceRecord};
use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// 全局自增的记录标识
static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// 记录标识，分配后在同名记录的多次同步之间保留
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl RecordId {
    pub fn mint() -> Self {
        RecordId(NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// 目录中的记录都以名字为键
pub trait CatalogRecord: Clone {
    fn name(&self) -> &str;
}

impl CatalogRecord for PackageRecord {
    fn name(&self) -> &str {
        &self.name
    }
}

impl CatalogRecord for ServiceRecord {
    fn name(&self) -> &str {
        &self.name
    }
}

impl CatalogRecord for CachedDownload {
    fn name(&self) -> &str {
        &self.file_name
    }
}

/// 带标识的记录
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    pub id: RecordId,
    pub record: T,
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

#[derive(Debug, Clone)]
pub struct CatalogSnapshot<T> {
    generation: u64,
    entries: BTreeMap<String, Tracked<T>>,
}

impl<T> CatalogSnapshot<T> {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            entries: BTreeMap::new(),
        }
    }

    /// 每次替换加一；0 表示尚未同步过
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Tracked<T>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// 按名字排序遍历
    pub fn iter(&self) -> impl Iterator<Item = &Tracked<T>> {
        self.entries.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// 以名字为键，把新列表与旧快照对齐
///
/// `preserve_ids` 为真时，两边都存在的名字沿用旧标识；
/// 新名字分配新标识；新列表中没有的名字被移除。
/// 同一列表里重复的名字只保留第一次出现。
pub fn reconcile<T: CatalogRecord>(
    previous: &CatalogSnapshot<T>,
    fresh: Vec<T>,
    preserve_ids: bool,
) -> CatalogSnapshot<T> {
    let mut entries = BTreeMap::new();
    for record in fresh {
        let name = record.name().to_string();
        if entries.contains_key(&name) {
            log::warn!("列表中出现重复的名字 {}，忽略后一项", name);
            continue;
        }
        let id = match previous.entries.get(&name) {
            Some(existing) if preserve_ids => existing.id,
            _ => RecordId::mint(),
        };
        entries.insert(name, Tracked { id, record });
    }
    CatalogSnapshot {
        generation: previous.generation + 1,
        entries,
    }
}

/// 单种实体的目录
#[derive(Debug)]
pub struct Catalog<T> {
    current: ArcSwap<CatalogSnapshot<T>>,
}

impl<T: CatalogRecord> Catalog<T> {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::new(Arc::new(CatalogSnapshot::empty())),
        }
    }

    /// 当前快照；持有期间不阻塞写入
    pub fn snapshot(&self) -> Arc<CatalogSnapshot<T>> {
        self.current.load_full()
    }

    /// 用完整的新列表替换目录
    pub fn replace(&self, fresh: Vec<T>, preserve_ids: bool) -> Arc<CatalogSnapshot<T>> {
        self.write(|previous| reconcile(previous, fresh.clone(), preserve_ids))
    }

    /// 插入或更新单条记录，已存在的名字保留原标识
    #[allow(dead_code)]
    pub fn upsert(&self, record: T) -> RecordId {
        let mut assigned = None;
        self.write(|previous| {
            let mut next = previous.clone();
            let name = record.name().to_string();
            let id = previous
                .entries
                .get(&name)
                .map(|t| t.id)
                .unwrap_or_else(RecordId::mint);
            next.entries.insert(
                name,
                Tracked {
                    id,
                    record: record.clone(),
                },
            );
            next.generation += 1;
            assigned = Some(id);
            next
        });
        assigned.unwrap_or_else(RecordId::mint)
    }

    /// 移除单条记录
    #[allow(dead_code)]
    pub fn remove(&self, name: &str) -> Option<Tracked<T>> {
        let mut removed = None;
        self.write(|previous| {
            let mut next = previous.clone();
            removed = next.entries.remove(name);
            if removed.is_some() {
                next.generation += 1;
            }
            next
        });
        removed
    }

    /// 基于当前快照构造新快照并原子换入
    ///
    /// 换入前快照已被别的写者替换时，`build` 会基于更新后的快照重新执行，
    /// 所以它可能被调用多次，只有最后一次的结果生效。
    fn write(
        &self,
        mut build: impl FnMut(&CatalogSnapshot<T>) -> CatalogSnapshot<T>,
    ) -> Arc<CatalogSnapshot<T>> {
        let mut installed = None;
        self.current.rcu(|previous| {
            let next = Arc::new(build(previous));
            installed = Some(Arc::clone(&next));
            next
        });
        installed.unwrap_or_else(|| self.current.load_full())
    }
}

impl<T: CatalogRecord> Default for Catalog<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 进程内唯一的目录存储，是外部真实状态的镜像，不做持久化
#[derive(Debug, Default)]
pub struct BrewState {
    pub formulae: Catalog<PackageRecord>,
    pub casks: Catalog<PackageRecord>,
    pub services: Catalog<ServiceRecord>,
    pub cached_downloads: Catalog<CachedDownload>,
}

static GLOBAL_STATE: OnceLock<Arc<BrewState>> = OnceLock::new();

impl BrewState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 懒初始化的全局存储
    pub fn global() -> Arc<BrewState> {
        Arc::clone(GLOBAL_STATE.get_or_init(|| Arc::new(BrewState::new())))
    }

    pub fn packages(&self, kind: PackageKind) -> &Catalog<PackageRecord> {
        match kind {
            PackageKind::Formula => &self.formulae,
            PackageKind::Cask => &self.casks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brew::types::ServiceStatus;
    use std::thread;
    use std::time::{Duration, Instant};

    fn service(name: &str, status: ServiceStatus) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            status,
            user: None,
            file: None,
            exit_code: None,
        }
    }

    #[test]
    fn preserve_ids_keeps_matched_names() {
        let catalog = Catalog::new();
        catalog.replace(
            vec![
                service("redis", ServiceStatus::Started),
                service("mysql", ServiceStatus::Stopped),
            ],
            true,
        );
        let before = catalog.snapshot();

        catalog.replace(
            vec![
                service("redis", ServiceStatus::Stopped),
                service("postgresql@16", ServiceStatus::Started),
            ],
            true,
        );
        let after = catalog.snapshot();

        assert_eq!(after.get("redis").unwrap().id, before.get("redis").unwrap().id);
        assert_eq!(after.get("redis").unwrap().status, ServiceStatus::Stopped);
        assert!(!after.contains("mysql"));
        let fresh_id = after.get("postgresql@16").unwrap().id;
        assert!(before.iter().all(|t| t.id != fresh_id));
        assert_eq!(after.generation(), before.generation() + 1);
    }

    #[test]
    fn without_preserve_ids_everything_is_fresh() {
        let catalog = Catalog::new();
        catalog.replace(vec![service("redis", ServiceStatus::Started)], false);
        let first = catalog.snapshot().get("redis").unwrap().id;
        catalog.replace(vec![service("redis", ServiceStatus::Started)], false);
        assert_ne!(catalog.snapshot().get("redis").unwrap().id, first);
    }

    #[test]
    fn identical_resync_is_idempotent_on_matched_names() {
        let catalog = Catalog::new();
        let listing = vec![
            service("redis", ServiceStatus::Started),
            service("mysql", ServiceStatus::None),
        ];
        catalog.replace(listing.clone(), true);
        let first = catalog.snapshot();
        catalog.replace(listing, true);
        let second = catalog.snapshot();

        let ids = |s: &CatalogSnapshot<ServiceRecord>| s.iter().map(|t| t.id).collect::<Vec<_>>();
        assert_eq!(ids(&*first), ids(&*second));
        assert_eq!(
            first.iter().map(|t| &t.record).collect::<Vec<_>>(),
            second.iter().map(|t| &t.record).collect::<Vec<_>>()
        );
    }

    #[test]
    fn readers_keep_their_snapshot_across_replacement() {
        let catalog = Catalog::new();
        catalog.replace(vec![service("redis", ServiceStatus::Started)], true);
        let held = catalog.snapshot();

        catalog.replace(Vec::new(), true);

        assert_eq!(held.len(), 1);
        assert!(held.contains("redis"));
        assert!(catalog.snapshot().is_empty());
    }

    #[test]
    fn duplicate_names_keep_first() {
        let snapshot = reconcile(
            &CatalogSnapshot::empty(),
            vec![
                service("redis", ServiceStatus::Started),
                service("redis", ServiceStatus::Error),
            ],
            true,
        );
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("redis").unwrap().status, ServiceStatus::Started);
    }

    #[test]
    fn upsert_and_remove_are_copy_on_write() {
        let catalog = Catalog::new();
        let id = catalog.upsert(service("redis", ServiceStatus::Started));
        let held = catalog.snapshot();

        assert_eq!(catalog.upsert(service("redis", ServiceStatus::Stopped)), id);
        assert_eq!(held.get("redis").unwrap().status, ServiceStatus::Started);

        let removed = catalog.remove("redis").unwrap();
        assert_eq!(removed.id, id);
        assert!(catalog.remove("redis").is_none());
        assert!(held.contains("redis"));
        assert!(catalog.snapshot().is_empty());
    }

    /// 取名字很慢的记录，让对齐过程持续一段时间
    #[derive(Debug, Clone)]
    struct SlowRecord(String);

    impl CatalogRecord for SlowRecord {
        fn name(&self) -> &str {
            thread::sleep(Duration::from_millis(50));
            &self.0
        }
    }

    #[test]
    fn snapshot_does_not_wait_for_reconcile() {
        let catalog = Arc::new(Catalog::new());
        let writer = {
            let catalog = Arc::clone(&catalog);
            thread::spawn(move || {
                let listing = ["a", "b", "c", "d"].map(|n| SlowRecord(n.to_string()));
                catalog.replace(listing.to_vec(), true);
            })
        };
        thread::sleep(Duration::from_millis(30));

        let started = Instant::now();
        let during = catalog.snapshot();
        let waited = started.elapsed();
        writer.join().unwrap();

        assert!(waited < Duration::from_millis(50), "读取等待了 {:?}", waited);
        assert_eq!(during.generation(), 0);
        assert_eq!(catalog.snapshot().len(), 4);
    }

    #[test]
    fn concurrent_upserts_are_not_lost() {
        let catalog = Arc::new(Catalog::new());
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let catalog = Arc::clone(&catalog);
                thread::spawn(move || {
                    for j in 0..25 {
                        catalog.upsert(service(&format!("svc-{i}-{j}"), ServiceStatus::Started));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.len(), 200);
        assert_eq!(snapshot.generation(), 200);
    }

    #[test]
    fn global_state_is_shared() {
        assert!(Arc::ptr_eq(&BrewState::global(), &BrewState::global()));
    }
}
