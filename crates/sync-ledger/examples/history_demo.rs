//! patch 历史演示
//!
//! 写入几次同步结果（正常、冲突、失败、空），然后按时间倒序打印历史

use std::sync::Arc;
use sync_ledger::{
    ConflictType, EndpointInfo, Node, Operation, Patch, PatchError, PatchStore, StaticEndpoint,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let state_dir = tempfile::TempDir::new()?;
    let local = StaticEndpoint::shared("fs:///home/user/Cells");
    // 远端变更通过事件流异步到达
    let mut remote_info = EndpointInfo::new("https://cells.example.com/ws/personal");
    remote_info.is_asynchronous = true;
    let remote = Arc::new(StaticEndpoint::with_info(remote_info));

    let store = PatchStore::open(state_dir.path(), local.clone(), remote.clone())?;

    println!("\n==============================================");
    println!("📦 patch 历史演示");
    println!("==============================================\n");

    // 1. 正常同步
    let mut patch = Patch::new(local.clone(), remote.clone());
    patch.enqueue(Operation::create(
        Node::folder("photos").with_uuid("5b1e7c2a-0f43-4d8e-9a61-3c7d2e9f8b10"),
    ));
    patch.enqueue(Operation::create(Node::file("photos/cat.jpg").with_etag("9f2c")));
    store.store(patch)?;

    // 2. 带冲突的同步
    let mut patch = Patch::new(local.clone(), remote.clone());
    patch.enqueue(Operation::conflict(
        Node::file("notes.md"),
        ConflictType::PathOperation,
        Operation::update(Node::file("notes.md").with_etag("left")),
        Operation::delete(Node::file("notes.md")),
    ));
    store.store(patch)?;

    // 3. 失败的同步
    let mut patch = Patch::new(local.clone(), remote.clone());
    patch.enqueue(Operation::move_to(Node::file("draft.txt"), "final.txt"));
    patch.set_patch_error(PatchError::new("remote unreachable"));
    store.store(patch)?;

    // 4. 恢复后的空同步（错误之后第一次，会被记录）
    store.publish_patch(Patch::new(local.clone(), remote.clone()))?;

    store.flush()?;

    for patch in store.load(0, 10)? {
        println!(
            "• {} [{}] {} ops{}",
            patch.stamp().format("%H:%M:%S%.3f"),
            patch.uuid(),
            patch.size(),
            patch
                .patch_error()
                .map(|e| format!(" ❌ {}", e))
                .unwrap_or_default()
        );
        patch.walk_operations(&[], |op| {
            println!("    - {} {}", op.op_type(), op.node().path);
        });
    }

    store.stop()?;
    Ok(())
}
