//! The walker state machine.
//!
//! Commit nodes are interned once per walker in an arena keyed by OID;
//! parent links are arena indices. Each node carries the traversal flags
//! (`seen`, `uninteresting`, `topology_delay`, `parsed`) and the
//! topological in-degree counter. Parsing is lazy and cheap: only parent
//! OIDs and the committer timestamp are pulled out of the raw record.

use std::collections::HashMap;

use grix_hash::Oid;
use grix_object::{Commit, ObjectKind};
use grix_repository::Repository;
use grix_utils::wildmatch::has_wildcard;

use crate::{Sorting, WalkError};

struct CommitNode {
    oid: Oid,
    parents: Vec<usize>,
    time: i64,
    seen: bool,
    uninteresting: bool,
    topology_delay: bool,
    parsed: bool,
    in_degree: u32,
}

impl CommitNode {
    fn new(oid: Oid) -> Self {
        Self {
            oid,
            parents: Vec::new(),
            time: 0,
            seen: false,
            uninteresting: false,
            topology_delay: false,
            parsed: false,
            in_degree: 0,
        }
    }
}

/// Which per-step iterator is active.
#[derive(Clone, Copy, PartialEq, Eq)]
enum IterMode {
    Unsorted,
    Time,
    Topological,
    Reverse,
}

/// A restartable walk over commit history.
pub struct Revwalk<'repo> {
    repo: &'repo Repository,
    nodes: Vec<CommitNode>,
    by_oid: HashMap<Oid, usize>,
    user_input: Vec<usize>,
    time_queue: Vec<usize>,
    unsorted_queue: Vec<usize>,
    topo_queue: Vec<usize>,
    reverse_queue: Vec<usize>,
    mode: IterMode,
    sorting: Sorting,
    first_parent: bool,
    walking: bool,
    did_push: bool,
    did_hide: bool,
}

impl<'repo> Revwalk<'repo> {
    pub fn new(repo: &'repo Repository) -> Self {
        Self {
            repo,
            nodes: Vec::new(),
            by_oid: HashMap::new(),
            user_input: Vec::new(),
            time_queue: Vec::new(),
            unsorted_queue: Vec::new(),
            topo_queue: Vec::new(),
            reverse_queue: Vec::new(),
            mode: IterMode::Unsorted,
            sorting: Sorting::NONE,
            first_parent: false,
            walking: false,
            did_push: false,
            did_hide: false,
        }
    }

    // --- Seeding ---

    /// Include `oid` (and its ancestry) in the walk.
    pub fn push(&mut self, oid: Oid) -> Result<(), WalkError> {
        self.push_commit(oid, false, false)
    }

    /// Exclude `oid` and all its ancestors from the walk.
    pub fn hide(&mut self, oid: Oid) -> Result<(), WalkError> {
        self.push_commit(oid, true, false)
    }

    /// Include the commit a reference resolves to.
    pub fn push_ref(&mut self, name: &str) -> Result<(), WalkError> {
        let oid = self.repo.refs()?.resolve_oid(name)?;
        self.push_commit(oid, false, false)
    }

    /// Exclude the commit a reference resolves to.
    pub fn hide_ref(&mut self, name: &str) -> Result<(), WalkError> {
        let oid = self.repo.refs()?.resolve_oid(name)?;
        self.push_commit(oid, true, false)
    }

    pub fn push_head(&mut self) -> Result<(), WalkError> {
        self.push_ref("HEAD")
    }

    pub fn hide_head(&mut self) -> Result<(), WalkError> {
        self.hide_ref("HEAD")
    }

    /// Include every ref matching a glob. Refs that do not peel to a
    /// commit are silently skipped.
    pub fn push_glob(&mut self, glob: &str) -> Result<(), WalkError> {
        self.seed_glob(glob, false)
    }

    /// Exclude every ref matching a glob.
    pub fn hide_glob(&mut self, glob: &str) -> Result<(), WalkError> {
        self.seed_glob(glob, true)
    }

    /// Select the output ordering. Resets an in-progress walk.
    pub fn set_sorting(&mut self, sorting: Sorting) {
        if self.walking {
            self.reset();
        }
        self.sorting = sorting;
        self.mode = if sorting.contains(Sorting::TIME) {
            IterMode::Time
        } else {
            IterMode::Unsorted
        };
    }

    /// Follow only the first parent of each commit.
    pub fn simplify_first_parent(&mut self, enable: bool) {
        self.first_parent = enable;
    }

    // --- Iteration ---

    /// The next OID of the walk. At the end the walker resets itself and
    /// reports `IterOver`.
    pub fn next_oid(&mut self) -> Result<Oid, WalkError> {
        if !self.walking {
            self.prepare_walk()?;
        }
        match self.next_inner() {
            Ok(idx) => Ok(self.nodes[idx].oid),
            Err(e) if e.is_iter_over() => {
                self.reset();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// The next commit, fully parsed via the object database.
    pub fn next_commit(&mut self) -> Result<(Oid, Commit), WalkError> {
        let oid = self.next_oid()?;
        Ok((oid, self.repo.find_commit(&oid)?))
    }

    /// Clear traversal state and seeds while keeping the interned node
    /// arena for the next walk.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.seen = false;
            node.uninteresting = false;
            node.topology_delay = false;
            node.in_degree = 0;
        }
        self.user_input.clear();
        self.time_queue.clear();
        self.unsorted_queue.clear();
        self.topo_queue.clear();
        self.reverse_queue.clear();
        self.first_parent = false;
        self.walking = false;
        self.did_push = false;
        self.did_hide = false;
    }

    // --- Seeding internals ---

    fn seed_glob(&mut self, glob: &str, hide: bool) -> Result<(), WalkError> {
        let mut pattern = if glob.starts_with("refs/") {
            glob.to_string()
        } else {
            format!("refs/{glob}")
        };
        if !has_wildcard(&pattern) {
            pattern.push_str("/*");
        }

        let refdb = self.repo.refs()?;
        let mut seeds = Vec::new();
        refdb.for_each_glob(&pattern, |reference| {
            let oid = match reference.target() {
                Some(oid) => oid,
                None => refdb
                    .resolve(reference.name().as_str())?
                    .target()
                    .expect("resolved reference is direct"),
            };
            seeds.push(oid);
            Ok(())
        })?;

        for oid in seeds {
            self.push_commit(oid, hide, true)?;
        }
        Ok(())
    }

    /// Register one seed. Tags peel to the commit they name; a glob seed
    /// that does not peel to a commit is dropped.
    fn push_commit(&mut self, oid: Oid, hide: bool, from_glob: bool) -> Result<(), WalkError> {
        let commit_oid = match self.repo.peel_to_commit(&oid) {
            Ok((commit_oid, _)) => commit_oid,
            Err(_) if from_glob => return Ok(()),
            Err(grix_repository::RepoError::BadObjectType { .. }) => {
                return Err(WalkError::NotACommit(oid));
            }
            Err(e) => return Err(e.into()),
        };

        let idx = self.intern(commit_oid);
        if self.nodes[idx].uninteresting {
            return Ok(());
        }
        if hide {
            self.did_hide = true;
        } else {
            self.did_push = true;
        }
        self.nodes[idx].uninteresting = hide;
        self.user_input.push(idx);
        Ok(())
    }

    fn intern(&mut self, oid: Oid) -> usize {
        if let Some(&idx) = self.by_oid.get(&oid) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(CommitNode::new(oid));
        self.by_oid.insert(oid, idx);
        idx
    }

    // --- Parsing ---

    /// Load a node's parents and committer time from the object database.
    fn parse(&mut self, idx: usize) -> Result<(), WalkError> {
        if self.nodes[idx].parsed {
            return Ok(());
        }
        let oid = self.nodes[idx].oid;
        let raw = self.repo.odb()?.read(&oid)?;
        if raw.kind != ObjectKind::Commit {
            return Err(WalkError::NotACommit(oid));
        }

        let (parent_oids, time) = quick_parse(&oid, &raw.data)?;
        let parents: Vec<usize> = parent_oids.into_iter().map(|p| self.intern(p)).collect();

        let node = &mut self.nodes[idx];
        node.parents = parents;
        node.time = time;
        node.parsed = true;
        Ok(())
    }

    // --- Walk preparation ---

    fn prepare_walk(&mut self) -> Result<(), WalkError> {
        if !self.did_push {
            return Err(WalkError::IterOver);
        }

        if self.did_hide {
            self.premark_uninteresting()?;
        }

        for idx in self.user_input.clone() {
            let hide = self.nodes[idx].uninteresting;
            self.process_commit(idx, hide)?;
        }

        if self.sorting.contains(Sorting::TOPOLOGICAL) {
            // Pre-drain the current ordering while counting in-degrees,
            // then switch to the delay-based emitter.
            loop {
                match self.next_inner() {
                    Ok(idx) => {
                        let max = self.parent_limit(idx);
                        for i in 0..max {
                            let parent = self.nodes[idx].parents[i];
                            self.nodes[parent].in_degree += 1;
                        }
                        self.topo_queue.push(idx);
                    }
                    Err(e) if e.is_iter_over() => break,
                    Err(e) => return Err(e),
                }
            }
            self.mode = IterMode::Topological;
        }

        if self.sorting.contains(Sorting::REVERSE) {
            loop {
                match self.next_inner() {
                    Ok(idx) => self.reverse_queue.push(idx),
                    Err(e) if e.is_iter_over() => break,
                    Err(e) => return Err(e),
                }
            }
            self.mode = IterMode::Reverse;
        }

        self.walking = true;
        Ok(())
    }

    /// Walk down from all seeds in time order, spreading the
    /// uninteresting mark, until only uninteresting commits remain queued.
    fn premark_uninteresting(&mut self) -> Result<(), WalkError> {
        let mut queue: Vec<usize> = Vec::new();

        for idx in self.user_input.clone() {
            self.parse(idx)?;
            if !queue.contains(&idx) {
                self.insert_by_time(&mut queue, idx);
            }
        }

        while queue.iter().any(|&i| !self.nodes[i].uninteresting) {
            let idx = queue.remove(0);
            for pi in 0..self.nodes[idx].parents.len() {
                let parent = self.nodes[idx].parents[pi];
                self.parse(parent)?;
                if self.nodes[idx].uninteresting {
                    self.nodes[parent].uninteresting = true;
                }
                if queue.contains(&parent) {
                    continue;
                }
                self.insert_by_time(&mut queue, parent);
            }
        }
        Ok(())
    }

    fn process_commit(&mut self, idx: usize, hide: bool) -> Result<(), WalkError> {
        if hide {
            self.mark_uninteresting(idx)?;
        }
        if self.nodes[idx].seen {
            return Ok(());
        }
        self.nodes[idx].seen = true;
        self.parse(idx)?;
        if !hide {
            self.enqueue(idx);
        }
        Ok(())
    }

    fn process_parents(&mut self, idx: usize) -> Result<(), WalkError> {
        let max = self.parent_limit(idx);
        let hide = self.nodes[idx].uninteresting;
        for i in 0..max {
            let parent = self.nodes[idx].parents[i];
            self.process_commit(parent, hide)?;
        }
        Ok(())
    }

    /// Spread the uninteresting mark to every ancestor.
    fn mark_uninteresting(&mut self, idx: usize) -> Result<(), WalkError> {
        let mut pending = vec![idx];
        while let Some(current) = pending.pop() {
            self.nodes[current].uninteresting = true;
            self.parse(current)?;
            for pi in 0..self.nodes[current].parents.len() {
                let parent = self.nodes[current].parents[pi];
                if !self.nodes[parent].uninteresting {
                    pending.push(parent);
                }
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, idx: usize) {
        match self.mode {
            IterMode::Time => {
                let mut queue = std::mem::take(&mut self.time_queue);
                self.insert_by_time(&mut queue, idx);
                self.time_queue = queue;
            }
            _ => self.unsorted_queue.push(idx),
        }
    }

    /// Keep `queue` sorted newest-first; equal times preserve insertion
    /// order.
    fn insert_by_time(&self, queue: &mut Vec<usize>, idx: usize) {
        let time = self.nodes[idx].time;
        let at = queue.partition_point(|&i| self.nodes[i].time >= time);
        queue.insert(at, idx);
    }

    fn parent_limit(&self, idx: usize) -> usize {
        let count = self.nodes[idx].parents.len();
        if self.first_parent && count > 0 {
            1
        } else {
            count
        }
    }

    // --- Per-step iterators ---

    fn next_inner(&mut self) -> Result<usize, WalkError> {
        match self.mode {
            IterMode::Time => self.next_time(),
            IterMode::Unsorted => self.next_unsorted(),
            IterMode::Topological => self.next_topological(),
            IterMode::Reverse => self.next_reverse(),
        }
    }

    fn next_time(&mut self) -> Result<usize, WalkError> {
        while !self.time_queue.is_empty() {
            let idx = self.time_queue.remove(0);
            if self.nodes[idx].uninteresting {
                continue;
            }
            self.process_parents(idx)?;
            return Ok(idx);
        }
        Err(WalkError::IterOver)
    }

    fn next_unsorted(&mut self) -> Result<usize, WalkError> {
        while let Some(idx) = self.unsorted_queue.pop() {
            if self.nodes[idx].uninteresting {
                continue;
            }
            self.process_parents(idx)?;
            return Ok(idx);
        }
        Err(WalkError::IterOver)
    }

    fn next_topological(&mut self) -> Result<usize, WalkError> {
        loop {
            let Some(idx) = self.topo_queue.pop() else {
                return Err(WalkError::IterOver);
            };

            // A commit with children still pending is delayed; it comes
            // back once its last child decrements it to zero.
            if self.nodes[idx].in_degree > 0 {
                self.nodes[idx].topology_delay = true;
                continue;
            }

            let max = self.parent_limit(idx);
            for i in 0..max {
                let parent = self.nodes[idx].parents[i];
                let node = &mut self.nodes[parent];
                node.in_degree -= 1;
                if node.in_degree == 0 && node.topology_delay {
                    node.topology_delay = false;
                    self.topo_queue.push(parent);
                }
            }

            return Ok(idx);
        }
    }

    fn next_reverse(&mut self) -> Result<usize, WalkError> {
        self.reverse_queue.pop().ok_or(WalkError::IterOver)
    }
}

impl Iterator for Revwalk<'_> {
    type Item = Result<Oid, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_oid() {
            Ok(oid) => Some(Ok(oid)),
            Err(e) if e.is_iter_over() => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Pull parent OIDs and the committer timestamp out of raw commit bytes
/// without building a full `Commit`.
fn quick_parse(oid: &Oid, data: &[u8]) -> Result<(Vec<Oid>, i64), WalkError> {
    let corrupt = |reason: &str| WalkError::CorruptCommit {
        oid: *oid,
        reason: reason.to_string(),
    };

    let mut parents = Vec::new();
    let mut time: Option<i64> = None;

    for line in data.split(|&b| b == b'\n') {
        if line.is_empty() {
            // Header/message separator.
            break;
        }
        if let Some(hex) = line.strip_prefix(b"parent ") {
            let hex = std::str::from_utf8(hex).map_err(|_| corrupt("bad parent line"))?;
            parents.push(Oid::from_hex(hex).map_err(|_| corrupt("bad parent OID"))?);
        } else if let Some(rest) = line.strip_prefix(b"committer ") {
            // "<name> <email> <seconds> <tz>"; the email may itself hold
            // digits, so anchor on the closing '>'.
            let after_email = match rest.iter().rposition(|&b| b == b'>') {
                Some(at) => &rest[at + 1..],
                None => rest,
            };
            let seconds = after_email
                .split(|&b| b == b' ')
                .find(|tok| !tok.is_empty())
                .and_then(|tok| std::str::from_utf8(tok).ok())
                .and_then(|tok| tok.parse::<i64>().ok())
                .ok_or_else(|| corrupt("missing committer timestamp"))?;
            time = Some(seconds);
        }
    }

    let time = time.ok_or_else(|| corrupt("missing committer line"))?;
    Ok((parents, time))
}
