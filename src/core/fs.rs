//! 文件加载
//!
//! 着色器二进制等资源的数据来源，核心逻辑不依赖文件格式。

use std::path::Path;
use tracing::debug;

use super::error::Result;

/// 读取整个文件
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    debug!(path = %path.display(), size = data.len(), "File loaded");
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::DistGfxError;

    #[test]
    fn test_load_file() {
        let path = std::env::temp_dir().join(format!("dist_gfx_load_{}.bin", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        assert_eq!(load_file(&path).unwrap(), vec![1, 2, 3, 4]);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(load_file(&path), Err(DistGfxError::Io(_))));
    }
}
