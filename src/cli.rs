use std::ffi::OsStr;

use crate::fetcher::Refresh;

/// 命令行参数：只认 `--force` / `-f`，其它参数一律忽略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Args {
    pub force: bool,
}

impl Args {
    pub fn from_env() -> Self {
        // 非 UTF-8 参数同样忽略，不能 panic
        Self::parse_from(std::env::args_os().skip(1))
    }

    pub fn parse_from<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let force = args
            .into_iter()
            .any(|arg| arg.as_ref() == "--force" || arg.as_ref() == "-f");
        Self { force }
    }

    pub fn refresh(&self) -> Refresh {
        Refresh::from_force(self.force)
    }
}
