//! Memoized uniform and attribute locations for the active program.
//!
//! Built-ins live in a fixed array indexed by `BuiltinUniform`; declared
//! inputs, imports and pass targets go through a name map. Both are cleared
//! together by `invalidate`, which also bumps the epoch so callers can tell
//! handles from different programs apart.
use std::collections::HashMap;

use chrono::{DateTime, Datelike, Local, Timelike};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinUniform {
    VertexData,
    RenderSize,
    PassIndex,
    Time,
    TimeDelta,
    Date,
    FrameIndex,
}

impl BuiltinUniform {
    pub const ALL: [BuiltinUniform; 7] = [
        BuiltinUniform::VertexData,
        BuiltinUniform::RenderSize,
        BuiltinUniform::PassIndex,
        BuiltinUniform::Time,
        BuiltinUniform::TimeDelta,
        BuiltinUniform::Date,
        BuiltinUniform::FrameIndex,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinUniform::VertexData => isfdoc::VERTEX_ATTRIBUTE,
            BuiltinUniform::RenderSize => "RENDERSIZE",
            BuiltinUniform::PassIndex => "PASSINDEX",
            BuiltinUniform::Time => "TIME",
            BuiltinUniform::TimeDelta => "TIMEDELTA",
            BuiltinUniform::Date => "DATE",
            BuiltinUniform::FrameIndex => "FRAMEINDEX",
        }
    }

    /// Vertex attribute rather than a uniform.
    pub fn is_attribute(self) -> bool {
        matches!(self, BuiltinUniform::VertexData)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// A resolved handle, or the knowledge that the program does not use the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedLocation<L> {
    pub location: Option<L>,
    pub epoch: u64,
}

#[derive(Debug)]
pub struct UniformCache<L> {
    epoch: u64,
    builtins: [Option<CachedLocation<L>>; 7],
    named: HashMap<String, CachedLocation<L>>,
    lookups: u64,
}

impl<L> Default for UniformCache<L> {
    fn default() -> Self {
        Self {
            epoch: 0,
            builtins: [None, None, None, None, None, None, None],
            named: HashMap::new(),
            lookups: 0,
        }
    }
}

impl<L: Copy> UniformCache<L> {
    pub fn resolve(
        &mut self,
        builtin: BuiltinUniform,
        lookup: impl FnOnce(&str) -> Option<L>,
    ) -> Option<L> {
        let epoch = self.epoch;
        let slot = &mut self.builtins[builtin.slot()];
        if let Some(cached) = slot.filter(|cached| cached.epoch == epoch) {
            return cached.location;
        }
        self.lookups += 1;
        let location = lookup(builtin.name());
        *slot = Some(CachedLocation { location, epoch });
        location
    }

    pub fn resolve_named(
        &mut self,
        name: &str,
        lookup: impl FnOnce(&str) -> Option<L>,
    ) -> Option<L> {
        let epoch = self.epoch;
        if let Some(cached) = self.named.get(name).filter(|cached| cached.epoch == epoch) {
            return cached.location;
        }
        self.lookups += 1;
        let location = lookup(name);
        self.named
            .insert(name.to_string(), CachedLocation { location, epoch });
        location
    }

    /// Drops every cached handle. Call whenever a new program is linked.
    pub fn invalidate(&mut self) {
        self.epoch += 1;
        self.builtins = [None, None, None, None, None, None, None];
        self.named.clear();
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Program lookups performed so far (cache misses).
    pub fn lookups(&self) -> u64 {
        self.lookups
    }
}

/// `DATE` uniform: year, month, day, seconds since midnight.
pub fn date_vector(now: DateTime<Local>) -> [f32; 4] {
    let seconds_since_midnight =
        now.num_seconds_from_midnight() as f32 + now.nanosecond() as f32 / 1_000_000_000.0;
    [
        now.year() as f32,
        now.month() as f32,
        now.day() as f32,
        seconds_since_midnight,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builtins_resolve_once_per_epoch() {
        let mut cache: UniformCache<u32> = UniformCache::default();
        let mut calls = 0;
        for _ in 0..3 {
            let location = cache.resolve(BuiltinUniform::Time, |name| {
                calls += 1;
                assert_eq!(name, "TIME");
                Some(7)
            });
            assert_eq!(location, Some(7));
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.lookups(), 1);
    }

    #[test]
    fn invalidate_forces_fresh_lookups() {
        let mut cache: UniformCache<u32> = UniformCache::default();
        assert_eq!(cache.resolve(BuiltinUniform::RenderSize, |_| Some(1)), Some(1));
        assert_eq!(cache.resolve_named("level", |_| Some(2)), Some(2));

        cache.invalidate();
        assert_eq!(cache.epoch(), 1);
        assert_eq!(cache.resolve(BuiltinUniform::RenderSize, |_| Some(10)), Some(10));
        assert_eq!(cache.resolve_named("level", |_| Some(20)), Some(20));
        assert_eq!(cache.lookups(), 4);
    }

    #[test]
    fn misses_are_cached_too() {
        let mut cache: UniformCache<u32> = UniformCache::default();
        assert_eq!(cache.resolve_named("unused", |_| None), None);
        assert_eq!(cache.resolve_named("unused", |_| Some(3)), None);
        assert_eq!(cache.lookups(), 1);
    }

    #[test]
    fn builtin_names_match_glsl_identifiers() {
        let names: Vec<&str> = BuiltinUniform::ALL.iter().map(|b| b.name()).collect();
        assert_eq!(
            names,
            [
                "VERTEXDATA",
                "RENDERSIZE",
                "PASSINDEX",
                "TIME",
                "TIMEDELTA",
                "DATE",
                "FRAMEINDEX"
            ]
        );
        assert!(BuiltinUniform::VertexData.is_attribute());
    }

    #[test]
    fn date_vector_counts_seconds_since_midnight() {
        let moment = Local
            .with_ymd_and_hms(2024, 3, 9, 1, 2, 3)
            .single()
            .expect("unambiguous local time");
        assert_eq!(date_vector(moment), [2024.0, 3.0, 9.0, 3723.0]);
    }
}
