//! Belief-propagation (peeling) decoder.
//!
//! Check nodes are received blocks with their still-unresolved source
//! indices. A check with one unresolved source resolves it; resolving a
//! source XORs its data out of every check that references it, which may
//! leave further checks with a single source. Those go on a worklist, so
//! the peeling runs iteratively with no recursion.

struct Check {
    unresolved: Vec<usize>,
    data: Vec<u8>,
}

/// Bipartite check/source graph for `k` source blocks.
pub struct BlockGraph {
    k: usize,
    resolved: Vec<Option<Vec<u8>>>,
    resolved_count: usize,
    checks: Vec<Check>,
    /// Check indices waiting on each source.
    waiting: Vec<Vec<usize>>,
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

impl BlockGraph {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            resolved: vec![None; k],
            resolved_count: 0,
            checks: Vec::new(),
            waiting: vec![Vec::new(); k],
        }
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved_count
    }

    pub fn is_complete(&self) -> bool {
        self.resolved_count >= self.k
    }

    /// Add a block covering `sources` (all `< k`) and propagate.
    /// Returns true once every source is resolved.
    pub fn add_block(&mut self, sources: &[usize], mut data: Vec<u8>) -> bool {
        let mut unresolved = Vec::with_capacity(sources.len());
        for &src in sources {
            match &self.resolved[src] {
                Some(known) => xor_into(&mut data, known),
                None => unresolved.push(src),
            }
        }

        match unresolved.len() {
            0 => {}
            1 => self.propagate(unresolved[0], data),
            _ => {
                let ix = self.checks.len();
                for &src in &unresolved {
                    self.waiting[src].push(ix);
                }
                self.checks.push(Check { unresolved, data });
            }
        }
        self.is_complete()
    }

    fn propagate(&mut self, source: usize, data: Vec<u8>) {
        let mut worklist = vec![(source, data)];
        while let Some((src, data)) = worklist.pop() {
            if self.resolved[src].is_some() {
                continue;
            }
            for ix in std::mem::take(&mut self.waiting[src]) {
                let check = &mut self.checks[ix];
                let Some(pos) = check.unresolved.iter().position(|&s| s == src) else {
                    continue;
                };
                check.unresolved.swap_remove(pos);
                xor_into(&mut check.data, &data);
                if check.unresolved.len() == 1 {
                    let last = check.unresolved[0];
                    check.unresolved.clear();
                    worklist.push((last, std::mem::take(&mut check.data)));
                }
            }
            self.resolved[src] = Some(data);
            self.resolved_count += 1;
        }
    }

    /// Concatenate the resolved sources in index order, or `None` if any
    /// source is still missing.
    pub fn into_sources(self) -> Option<Vec<Vec<u8>>> {
        self.resolved.into_iter().collect()
    }
}
