//! Compression and checksum behaviour against the real tools on `PATH`.
//! Algorithms whose binary is absent are skipped.

use dbvault_core::executor::{checksum, CompressionAlgorithm, Compressor, ToolRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;

fn registry() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::discover(&BTreeMap::new()))
}

#[tokio::test]
async fn test_compression_preserves_content() {
    let tools = registry();
    let compressor = Compressor::new(tools.clone());
    let dir = tempfile::tempdir().unwrap();

    let payload: Vec<u8> = (0..20_000u32)
        .flat_map(|i| format!("INSERT INTO t VALUES ({});\n", i % 97).into_bytes())
        .collect();

    for algorithm in CompressionAlgorithm::ALL {
        if !tools.is_available(algorithm.tool()) {
            eprintln!("{} not on PATH, skipping", algorithm);
            continue;
        }
        for (label, content) in [("empty", Vec::new()), ("dump", payload.clone())] {
            let raw = dir.path().join(format!("{}-{}.sql", label, algorithm));
            std::fs::write(&raw, &content).unwrap();

            let packed = algorithm.compressed_path(&raw);
            compressor.compress(&raw, &packed, algorithm).await.unwrap();
            if !content.is_empty() {
                assert!(std::fs::metadata(&packed).unwrap().len() < content.len() as u64);
            }

            let restored = dir.path().join(format!("{}-{}.out", label, algorithm));
            let detected = compressor.decompress(&packed, &restored).await.unwrap();
            assert_eq!(detected, algorithm);
            assert_eq!(std::fs::read(&restored).unwrap(), content, "{} {}", algorithm, label);
        }
    }
}

#[tokio::test]
async fn test_decompressing_garbage_fails_with_tool_error() {
    let tools = registry();
    if !tools.is_available(CompressionAlgorithm::Gzip.tool()) {
        eprintln!("gzip not on PATH, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("broken.sql.gz");
    std::fs::write(&bogus, b"definitely not gzip").unwrap();

    let err = Compressor::new(tools)
        .decompress(&bogus, &dir.path().join("broken.sql"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "TOOL_FAILED");
}

#[tokio::test]
async fn test_directory_checksum_is_order_independent_and_content_sensitive() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    // Same files, created in a different order
    std::fs::write(a.path().join("toc.dat"), b"toc").unwrap();
    std::fs::write(a.path().join("3001.dat"), b"rows").unwrap();
    std::fs::write(b.path().join("3001.dat"), b"rows").unwrap();
    std::fs::write(b.path().join("toc.dat"), b"toc").unwrap();

    let sum_a = checksum(a.path()).await.unwrap();
    assert_eq!(sum_a, checksum(b.path()).await.unwrap());

    std::fs::write(b.path().join("3001.dat"), b"rows!").unwrap();
    assert_ne!(sum_a, checksum(b.path()).await.unwrap());
}
