//! Commit-graph walks used to pick haves, check fast-forwards and decide
//! which objects go into a pack.

use std::collections::{BinaryHeap, HashSet, VecDeque};

use git_hash::ObjectId;
use git_object::{Commit, FileMode, ObjectType, Tag, Tree};
use git_odb::{ObjectDatabase, OdbError};
use git_pack::write::generate_pack;

fn read_commit(odb: &ObjectDatabase, oid: &ObjectId) -> Result<Option<Commit>, OdbError> {
    match odb.try_get(oid)? {
        Some(raw) if raw.kind == ObjectType::Commit => Ok(Some(Commit::parse(&raw.data)?)),
        _ => Ok(None),
    }
}

/// Whether `descendant` can reach `ancestor` through parent links.
///
/// History missing from the store counts as unreachable, so an
/// `ancestor` we never had is never considered one.
pub fn is_ancestor(odb: &ObjectDatabase, ancestor: &ObjectId, descendant: &ObjectId) -> Result<bool, OdbError> {
    if ancestor == descendant {
        return Ok(true);
    }
    if !odb.has(ancestor) {
        return Ok(false);
    }
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([*descendant]);
    while let Some(oid) = queue.pop_front() {
        if !seen.insert(oid) {
            continue;
        }
        let Some(commit) = read_commit(odb, &oid)? else { continue };
        for parent in commit.parents {
            if parent == *ancestor {
                return Ok(true);
            }
            queue.push_back(parent);
        }
    }
    Ok(false)
}

#[derive(PartialEq, Eq)]
struct ByDate {
    time: i64,
    oid: ObjectId,
    parents: Vec<ObjectId>,
}

impl Ord for ByDate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time.cmp(&other.time).then_with(|| self.oid.cmp(&other.oid))
    }
}

impl PartialOrd for ByDate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Up to `limit` commits reachable from `tips`, newest committer date
/// first. Offering recent commits first lets negotiation find the
/// closest common ancestor early.
pub fn haves_by_date(odb: &ObjectDatabase, tips: &[ObjectId], limit: usize) -> Result<Vec<ObjectId>, OdbError> {
    let mut heap = BinaryHeap::new();
    let mut seen = HashSet::new();
    let mut enqueue = |oid: ObjectId, heap: &mut BinaryHeap<ByDate>| -> Result<(), OdbError> {
        if seen.insert(oid) {
            if let Some(commit) = read_commit(odb, &oid)? {
                heap.push(ByDate {
                    time: commit.committer.time,
                    oid,
                    parents: commit.parents,
                });
            }
        }
        Ok(())
    };
    for tip in tips {
        enqueue(*tip, &mut heap)?;
    }

    let mut out = Vec::new();
    while out.len() < limit {
        let Some(entry) = heap.pop() else { break };
        out.push(entry.oid);
        for parent in entry.parents {
            enqueue(parent, &mut heap)?;
        }
    }
    Ok(out)
}

/// Objects reachable from `include` but not from `exclude`, in
/// depth-first walk order. Gitlinks are not followed. Missing `exclude`
/// history is ignored; missing `include` objects are an error.
pub fn objects_to_pack(
    odb: &ObjectDatabase,
    include: &[ObjectId],
    exclude: &[ObjectId],
) -> Result<Vec<ObjectId>, OdbError> {
    let mut excluded = HashSet::new();
    walk(odb, exclude, &HashSet::new(), true, |oid| {
        excluded.insert(oid);
    })?;
    let mut out = Vec::new();
    walk(odb, include, &excluded, false, |oid| out.push(oid))?;
    Ok(out)
}

fn walk(
    odb: &ObjectDatabase,
    roots: &[ObjectId],
    skip: &HashSet<ObjectId>,
    missing_ok: bool,
    mut visit: impl FnMut(ObjectId),
) -> Result<(), OdbError> {
    let algo = odb.algorithm();
    let mut seen = HashSet::new();
    let mut stack: Vec<ObjectId> = roots.iter().rev().copied().collect();
    while let Some(oid) = stack.pop() {
        if skip.contains(&oid) || !seen.insert(oid) {
            continue;
        }
        let raw = match odb.try_get(&oid)? {
            Some(raw) => raw,
            None if missing_ok => continue,
            None => return Err(OdbError::NotFound(oid)),
        };
        visit(oid);
        match raw.kind {
            ObjectType::Commit => {
                let commit = Commit::parse(&raw.data)?;
                stack.extend(commit.parents.iter().rev());
                stack.push(commit.tree);
            }
            ObjectType::Tree => {
                let tree = Tree::parse(&raw.data, algo)?;
                stack.extend(
                    tree.entries
                        .iter()
                        .rev()
                        .filter(|e| e.mode != FileMode::Gitlink)
                        .map(|e| e.oid),
                );
            }
            ObjectType::Tag => stack.push(Tag::parse(&raw.data)?.target),
            ObjectType::Blob => {}
        }
    }
    Ok(())
}

/// Follow a chain of annotated tags to the object it finally names.
pub fn peel(odb: &ObjectDatabase, oid: &ObjectId) -> Result<ObjectId, OdbError> {
    let mut current = *oid;
    loop {
        match odb.try_get(&current)? {
            Some(raw) if raw.kind == ObjectType::Tag => current = Tag::parse(&raw.data)?.target,
            _ => return Ok(current),
        }
    }
}

/// Encode `objects` as a pack with deltas against earlier objects of
/// the same kind.
pub fn write_pack(odb: &ObjectDatabase, objects: &[ObjectId]) -> Result<Vec<u8>, OdbError> {
    let mut entries = Vec::with_capacity(objects.len());
    for oid in objects {
        let raw = odb.get(oid)?;
        entries.push((raw.kind, raw.data));
    }
    let written = generate_pack(Vec::new(), odb.algorithm(), &entries, true)?;
    Ok(written.inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git_hash::HashAlgorithm;
    use git_object::{Object, Signature, TreeEntry};

    struct Fixture {
        _dir: tempfile::TempDir,
        odb: ObjectDatabase,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::init(dir.path().join("objects"), HashAlgorithm::Sha1).unwrap();
        Fixture { _dir: dir, odb }
    }

    fn commit(odb: &ObjectDatabase, content: &str, parents: &[ObjectId], time: i64) -> ObjectId {
        let blob = odb.put(ObjectType::Blob, content.as_bytes()).unwrap();
        let tree = Tree {
            entries: vec![TreeEntry {
                mode: FileMode::Regular,
                name: "file.txt".into(),
                oid: blob,
            }],
        };
        let tree = odb.put_object(&Object::Tree(tree)).unwrap();
        let sig = Signature::new("Tester", "tester@example.com", time, 0);
        odb.put_object(&Object::Commit(Commit {
            tree,
            parents: parents.to_vec(),
            author: sig.clone(),
            committer: sig,
            extra_headers: Vec::new(),
            message: format!("{content}\n").into(),
        }))
        .unwrap()
    }

    #[test]
    fn ancestry_follows_parents() {
        let f = fixture();
        let a = commit(&f.odb, "a", &[], 100);
        let b = commit(&f.odb, "b", &[a], 200);
        let c = commit(&f.odb, "c", &[b], 300);
        let side = commit(&f.odb, "side", &[a], 250);

        assert!(is_ancestor(&f.odb, &a, &c).unwrap());
        assert!(is_ancestor(&f.odb, &c, &c).unwrap());
        assert!(!is_ancestor(&f.odb, &c, &a).unwrap());
        assert!(!is_ancestor(&f.odb, &side, &c).unwrap());

        let unknown = HashAlgorithm::Sha1.null_oid();
        assert!(!is_ancestor(&f.odb, &unknown, &c).unwrap());
    }

    #[test]
    fn haves_come_newest_first_and_respect_the_limit() {
        let f = fixture();
        let a = commit(&f.odb, "a", &[], 100);
        let b = commit(&f.odb, "b", &[a], 200);
        let side = commit(&f.odb, "side", &[a], 250);
        let c = commit(&f.odb, "c", &[b], 300);

        let haves = haves_by_date(&f.odb, &[c, side], 10).unwrap();
        assert_eq!(haves, vec![c, side, b, a]);
        assert_eq!(haves_by_date(&f.odb, &[c, side], 2).unwrap(), vec![c, side]);
    }

    #[test]
    fn pack_set_excludes_what_the_other_side_has() {
        let f = fixture();
        let a = commit(&f.odb, "a", &[], 100);
        let b = commit(&f.odb, "b", &[a], 200);

        let all = objects_to_pack(&f.odb, &[b], &[]).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], b);

        let new = objects_to_pack(&f.odb, &[b], &[a]).unwrap();
        assert_eq!(new.len(), 3);
        assert!(!new.contains(&a));

        let unknown = HashAlgorithm::Sha1.null_oid();
        let other = fixture();
        assert_eq!(objects_to_pack(&f.odb, &[b], &[unknown]).unwrap().len(), 6);
        assert!(matches!(
            objects_to_pack(&other.odb, &[b], &[]),
            Err(OdbError::NotFound(oid)) if oid == b
        ));
    }

    #[test]
    fn tags_peel_to_their_target() {
        let f = fixture();
        let a = commit(&f.odb, "a", &[], 100);
        let tag = f
            .odb
            .put_object(&Object::Tag(Tag {
                target: a,
                target_kind: ObjectType::Commit,
                name: "v1".into(),
                tagger: None,
                message: "release\n".into(),
            }))
            .unwrap();
        assert_eq!(peel(&f.odb, &tag).unwrap(), a);
        assert_eq!(peel(&f.odb, &a).unwrap(), a);
        assert_eq!(objects_to_pack(&f.odb, &[tag], &[a]).unwrap(), vec![tag]);
    }

    #[test]
    fn written_pack_round_trips_through_ingestion() {
        let f = fixture();
        let a = commit(&f.odb, "a", &[], 100);
        let objects = objects_to_pack(&f.odb, &[a], &[]).unwrap();
        let pack = write_pack(&f.odb, &objects).unwrap();

        let other = fixture();
        let received = other
            .odb
            .receive_pack(std::io::Cursor::new(pack), std::time::Duration::ZERO, |_| {
                std::ops::ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(received.objects, 3);
        assert!(other.odb.has(&a));
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

        #[test]
        fn ancestry_on_a_chain_matches_position(len in 1usize..8, i in 0usize..8, j in 0usize..8) {
            let (i, j) = (i % len, j % len);
            let f = fixture();
            let mut chain: Vec<ObjectId> = Vec::new();
            for n in 0..len {
                let parents: Vec<ObjectId> = chain.last().copied().into_iter().collect();
                chain.push(commit(&f.odb, &format!("c{n}"), &parents, 100 + n as i64));
            }
            proptest::prop_assert_eq!(is_ancestor(&f.odb, &chain[i], &chain[j]).unwrap(), i <= j);
        }
    }
}
