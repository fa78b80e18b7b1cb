#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tierenv::{
    EnvConfig, Environment, FileId, MigrationScope, PlacementClass, UserspaceBackend,
    UserspaceConfig,
};

#[derive(Arbitrary, Debug)]
enum EnvOp {
    Create { name: u8, wal: bool },
    Append { name: u8, data: Vec<u8> },
    Read { name: u8, offset: u16, len: u16 },
    Delete { name: u8 },
    Rename { from: u8, to: u8 },
    Migrate,
    CollectGarbage,
}

fn id(name: u8) -> FileId {
    FileId::new(format!("sst-{:02}", name % 8))
}

fuzz_target!(|ops: Vec<EnvOp>| {
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let Ok(env) = Environment::open(
        EnvConfig::new(dir.path()),
        UserspaceBackend::new(UserspaceConfig::default()),
    ) else {
        return;
    };

    for op in ops.iter().take(100) {
        match op {
            EnvOp::Create { name, wal } => {
                let class = if *wal { PlacementClass::Wal } else { PlacementClass::Data };
                let _ = env.create(&id(*name), class);
            }
            EnvOp::Append { name, data } => {
                if data.len() <= 4096 {
                    let _ = env.append(&id(*name), data);
                }
            }
            EnvOp::Read { name, offset, len } => {
                let _ = env.read(&id(*name), *offset as u64, *len as usize);
            }
            EnvOp::Delete { name } => {
                let _ = env.delete(&id(*name));
            }
            EnvOp::Rename { from, to } => {
                let _ = env.rename(&id(*from), &id(*to));
            }
            EnvOp::Migrate => {
                let _ = env.migration().start_migration(MigrationScope::All);
            }
            EnvOp::CollectGarbage => {
                let _ = env.migration().collect_garbage();
            }
        }
    }

    // WAL files never leave the conventional backend.
    for status in env.migration().migration_status().unwrap_or_default() {
        if status.class == PlacementClass::Wal {
            assert_eq!(status.backend, tierenv::BackendKind::Conventional);
        }
    }
});
