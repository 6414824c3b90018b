use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Include/exclude glob filter over repo-relative paths.
///
/// `*` does not cross `/`. An empty include list admits everything; an
/// exclude match always wins.
#[derive(Debug, Clone)]
pub struct FileFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl FileFilter {
    pub fn new<I, E>(include: I, exclude: E) -> Result<Self, globset::Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// A filter that admits every path.
    pub fn allow_all() -> Self {
        Self {
            include: None,
            exclude: None,
        }
    }

    pub fn allows(&self, path: &str) -> bool {
        if self.exclude.as_ref().is_some_and(|set| set.is_match(path)) {
            return false;
        }
        self.include.as_ref().is_none_or(|set| set.is_match(path))
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        Self::allow_all()
    }
}

fn compile<P>(patterns: P) -> Result<Option<GlobSet>, globset::Error>
where
    P: IntoIterator,
    P::Item: AsRef<str>,
{
    let mut builder = GlobSetBuilder::new();
    let mut any = false;
    for pattern in patterns {
        let pattern = pattern.as_ref().trim();
        if pattern.is_empty() {
            continue;
        }
        builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
        any = true;
    }
    if !any {
        return Ok(None);
    }
    builder.build().map(Some)
}
