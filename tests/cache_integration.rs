mod support;

use anyhow::Result;
use cellproxy::proxy::cache::RequestKey;

use support::*;

#[tokio::test]
async fn startup_prepares_empty_cells() -> Result<()> {
    let dirs = TestDirs::new()?;
    std::fs::create_dir_all(&dirs.cache_dir)?;
    std::fs::write(dirs.cell_path(1), b"left over from a previous run")?;
    std::fs::write(dirs.cache_dir.join("tmp_42"), b"interrupted write")?;

    let harness = ProxyHarnessBuilder::with_dirs(dirs)
        .with_settings(|settings| settings.cache_capacity = 3)
        .spawn()
        .await?;

    for slot in 1..=3 {
        assert_eq!(std::fs::read(harness.dirs.cell_path(slot))?, b"");
    }
    assert!(!harness.dirs.cache_dir.join("tmp_42").exists());
    assert_eq!(harness.cache.capacity(), 3);
    assert!(harness.cache.is_empty());
    harness.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn responses_land_in_slot_cells() -> Result<()> {
    let upstream = TestUpstream::responding(ok_response("on disk")).await?;
    let harness = ProxyHarnessBuilder::new()?.spawn().await?;

    harness
        .client()
        .await?
        .exchange(get_request(&upstream.authority(), "/disk"))
        .await?;

    assert_eq!(std::fs::read(harness.dirs.cell_path(1))?, ok_response("on disk"));
    assert_eq!(harness.cache.len(), 1);
    harness.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn least_recently_used_response_is_evicted() -> Result<()> {
    let upstream = TestUpstream::responding(ok_response("body")).await?;
    let harness = ProxyHarnessBuilder::new()?
        .with_settings(|settings| settings.cache_capacity = 2)
        .spawn()
        .await?;
    let requests: Vec<String> = ["/a", "/b", "/c"]
        .iter()
        .map(|path| get_request(&upstream.authority(), path))
        .collect();

    for request in &requests {
        harness.client().await?.exchange(request).await?;
    }

    let keys: Vec<RequestKey> = requests
        .iter()
        .map(|request| RequestKey::from(request.as_str()))
        .collect();
    assert!(!harness.cache.contains_key(&keys[0]));
    assert!(harness.cache.contains_key(&keys[1]));
    assert!(harness.cache.contains_key(&keys[2]));
    assert_eq!(harness.cache.len(), 2);
    harness.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn revalidated_entry_survives_eviction() -> Result<()> {
    let upstream =
        TestUpstream::scripted(vec![ok_response("a"), ok_response("b"), not_modified_response(), ok_response("c")])
            .await?;
    let harness = ProxyHarnessBuilder::new()?
        .with_settings(|settings| settings.cache_capacity = 2)
        .spawn()
        .await?;
    let request_a = get_request(&upstream.authority(), "/a");
    let request_b = get_request(&upstream.authority(), "/b");
    let request_c = get_request(&upstream.authority(), "/c");

    harness.client().await?.exchange(&request_a).await?;
    harness.client().await?.exchange(&request_b).await?;
    let revalidated = harness.client().await?.exchange(&request_a).await?;
    assert_eq!(revalidated, ok_response("a"));
    harness.client().await?.exchange(&request_c).await?;

    assert!(harness.cache.contains_key(&RequestKey::from(request_a.as_str())));
    assert!(!harness.cache.contains_key(&RequestKey::from(request_b.as_str())));
    assert!(harness.cache.contains_key(&RequestKey::from(request_c.as_str())));
    harness.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cache_write_failure_still_delivers_live_response() -> Result<()> {
    let upstream = TestUpstream::responding(ok_response("live")).await?;
    let harness = ProxyHarnessBuilder::new()?.spawn().await?;
    std::fs::remove_dir_all(&harness.dirs.cache_dir)?;
    let request = get_request(&upstream.authority(), "/unstorable");

    let response = harness.client().await?.exchange(&request).await?;

    assert_eq!(response, ok_response("live"));
    assert!(!harness.cache.contains_key(&RequestKey::from(request.as_str())));
    assert!(harness.cache.is_empty());
    let metrics = String::from_utf8(cellproxy::metrics::gather())?;
    assert!(
        metrics
            .lines()
            .any(|line| line.starts_with("cache_store_errors_total ") && !line.ends_with(" 0")),
        "store failure was not counted"
    );
    harness.shutdown().await;
    Ok(())
}
