//! `archivestore` — the OpenArchive CLI (`spec.md` §6): three mutually
//! exclusive subcommands, `backup`/`stub`/`scan`, dispatched the way
//! `pbs-tape`'s `pmt` dispatches its tape-control subcommands: plain
//! `#[api]`-annotated functions registered into a `CliCommandMap`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Error};
use serde_json::Value;

use proxmox_router::cli::{init_cli_logger, run_cli_command, CliCommand, CliCommandMap, CliEnvironment};
use proxmox_schema::{api, Schema, StringSchema};

use oarch_config::ArchiveStoreConfig;
use oarch_iopx::engine::PRODUCT_ARCHIVE_STORE;
use oarch_iopx::{ArchTls, Engine, StreamManager};
use oarch_types::{File, Iopx, IopxTreeConfig, Location, OpKind};

pub const PRODUCT_SCHEMA: Schema =
    StringSchema::new("Product identifier (e.g. 'glusterfs' or 'cvlt').").schema();

pub const STORE_SCHEMA: Schema =
    StringSchema::new("Store identifier within the product.").schema();

pub const PATH_SCHEMA: Schema = StringSchema::new("Path within the store.").schema();

pub const SCAN_TYPE_SCHEMA: Schema = StringSchema::new("Scan type: 'full' or 'incr'.").schema();

/// Bytes moved per `Pread`/`Pwrite` round, matching the fd-cache's default
/// read-ahead buffer size so a backup driven straight against the fd-cache
/// tree pulls whole cache lines.
const COPY_CHUNK: usize = 4 << 20;

fn engine_from_config(cfg: &ArchiveStoreConfig) -> Engine {
    Engine::new(cfg.create_fast_threads(), cfg.create_slow_threads())
}

fn tree_config(product: &str, store: &str, read: bool) -> IopxTreeConfig {
    let mut tree_cfg = IopxTreeConfig::new(product, store);
    if product == PRODUCT_ARCHIVE_STORE {
        // xattrs (and, were a real vendor driver bound in, object metadata)
        // live behind the archive-store product; caching them is worthwhile.
        tree_cfg.enable_meta_cache = true;
    } else if read {
        // Read side of a path-addressed distributed volume: read-ahead and
        // fd reuse pay off, matching the engine's §4.2 read-tree shape.
        tree_cfg.enable_fd_cache = true;
    }
    tree_cfg
}

fn dest_location(product: &str, store: &str, path: &str) -> Location {
    if product == PRODUCT_ARCHIVE_STORE {
        Location::with_uuid(product, store, path, proxmox_uuid::Uuid::generate())
    } else {
        Location::new(product, store, path)
    }
}

fn open_file(tree: &Arc<dyn Iopx>, loc: Location) -> Result<File, Error> {
    let mut file = ArchTls::alloc_arch_file(loc);
    let mut open_req = ArchTls::alloc_iopx_req(OpKind::Open);
    let open_result = tree.call(&mut file, &mut open_req);
    ArchTls::release_req(open_req);
    open_result.map_err(|err| anyhow::anyhow!("open {}: {err}", file.loc.path().display()))?;
    file.publish_owner(tree);
    Ok(file)
}

/// Copies `src`'s contents into `dest` in `COPY_CHUNK`-sized rounds,
/// returning total bytes moved. Both files must already be open. Requests
/// are drawn from the calling thread's pool (`ArchTls`), the same hot path
/// the fd-cache's own `open`/`pread` use.
fn copy_all(src_tree: &Arc<dyn Iopx>, src: &mut File, dest_tree: &Arc<dyn Iopx>, dest: &mut File) -> Result<u64, Error> {
    let mut offset: u64 = 0;
    loop {
        let mut read_req = ArchTls::alloc_iopx_req(OpKind::Pread);
        read_req.offset = offset;
        read_req.len = COPY_CHUNK;
        let read_result = src_tree.call(src, &mut read_req);
        if let Err(err) = read_result {
            ArchTls::release_req(read_req);
            return Err(anyhow::anyhow!("pread at {offset}: {err}"));
        }
        let n = read_req.buf.len();
        let chunk = std::mem::take(&mut read_req.buf);
        ArchTls::release_req(read_req);
        if n == 0 {
            break;
        }
        let mut write_req = ArchTls::alloc_iopx_req(OpKind::Pwrite);
        write_req.offset = offset;
        write_req.buf = chunk;
        write_req.len = n;
        let write_result = dest_tree.call(dest, &mut write_req);
        ArchTls::release_req(write_req);
        write_result.map_err(|err| anyhow::anyhow!("pwrite at {offset}: {err}"))?;
        offset += n as u64;
        if n < COPY_CHUNK {
            break;
        }
    }
    Ok(offset)
}

/// Copies `src`'s contents into a freshly allocated stream lease, matching
/// `spec.md` §4.5's per-file stream usage: the whole object size is known
/// up front (via `Fstat`) and handed to `alloc_item` before any bytes move,
/// then each round is pushed with `send_data` instead of a `Pwrite` through
/// the destination tree.
fn copy_via_stream(src_tree: &Arc<dyn Iopx>, src: &mut File, stream_mgr: &Arc<StreamManager>, dest_loc: &Location, dest_path: &str) -> Result<u64, Error> {
    let mut stat_req = ArchTls::alloc_iopx_req(OpKind::Fstat);
    let stat_result = src_tree.call(src, &mut stat_req);
    let size = stat_req.result_int.max(0) as u64;
    ArchTls::release_req(stat_req);
    stat_result.map_err(|err| anyhow::anyhow!("fstat: {err}"))?;

    let lease = stream_mgr.alloc_stream();
    lease
        .alloc_item(dest_loc.uuid_str(), Path::new(dest_path), size)
        .map_err(|err| anyhow::anyhow!("stream alloc_item: {err}"))?;

    let mut offset: u64 = 0;
    loop {
        let mut read_req = ArchTls::alloc_iopx_req(OpKind::Pread);
        read_req.offset = offset;
        read_req.len = COPY_CHUNK;
        let read_result = src_tree.call(src, &mut read_req);
        if let Err(err) = read_result {
            ArchTls::release_req(read_req);
            return Err(anyhow::anyhow!("pread at {offset}: {err}"));
        }
        let n = read_req.buf.len();
        let chunk = std::mem::take(&mut read_req.buf);
        ArchTls::release_req(read_req);
        if n == 0 {
            break;
        }
        lease.send_data(&chunk).map_err(|err| anyhow::anyhow!("stream send_data at {offset}: {err}"))?;
        offset += n as u64;
        if n < COPY_CHUNK {
            break;
        }
    }
    Ok(offset)
}

fn run_copy(
    src_product: &str,
    src_store: &str,
    dest_product: &str,
    dest_store: &str,
    input: &str,
    output: &str,
) -> Result<(u64, Location), Error> {
    let cfg = ArchiveStoreConfig::load_default()?;
    let engine = engine_from_config(&cfg);

    let src_tree = engine.mktree(&tree_config(src_product, src_store, true));
    // Building the destination tree also registers its stream pool
    // (`spec.md` §4.5) with the engine when `dest_product` is an
    // archive-store product, even though the archive-store copy path below
    // writes through a stream lease instead of this tree's `Pwrite`.
    let dest_tree = engine.mktree(&tree_config(dest_product, dest_store, false));

    let mut src_file = open_file(&src_tree, Location::new(src_product, src_store, input))?;
    let dest_loc = dest_location(dest_product, dest_store, output);
    let dest_id = dest_loc.clone();

    let bytes = if dest_product == PRODUCT_ARCHIVE_STORE {
        let stream_mgr = engine
            .stream_manager(dest_product, dest_store)
            .ok_or_else(|| anyhow::anyhow!("no stream pool registered for {dest_product}/{dest_store}"))?;
        copy_via_stream(&src_tree, &mut src_file, &stream_mgr, &dest_id, output)?
    } else {
        let mut dest_file = open_file(&dest_tree, dest_loc)?;
        copy_all(&src_tree, &mut src_file, &dest_tree, &mut dest_file)?
    };
    Ok((bytes, dest_id))
}

#[api(
    input: {
        properties: {
            "src-product": { schema: PRODUCT_SCHEMA },
            "src-store": { schema: STORE_SCHEMA },
            "dest-product": { schema: PRODUCT_SCHEMA },
            "dest-store": { schema: STORE_SCHEMA },
            input: { schema: PATH_SCHEMA },
            output: { schema: PATH_SCHEMA },
        },
    },
)]
/// Copy a file from the source product/store into the destination
/// product/store.
fn backup(
    src_product: String,
    src_store: String,
    dest_product: String,
    dest_store: String,
    input: String,
    output: String,
    _param: Value,
) -> Result<(), Error> {
    let (bytes, dest_id) = run_copy(&src_product, &src_store, &dest_product, &dest_store, &input, &output)?;
    log::info!("backup: copied {bytes} bytes from {src_product}/{src_store}:{input} to {dest_product}/{dest_store} ({})", dest_id.uuid_str());
    Ok(())
}

#[api(
    input: {
        properties: {
            "src-product": { schema: PRODUCT_SCHEMA },
            "src-store": { schema: STORE_SCHEMA },
            "dest-product": { schema: PRODUCT_SCHEMA },
            "dest-store": { schema: STORE_SCHEMA },
            input: { schema: PATH_SCHEMA },
            output: { schema: PATH_SCHEMA },
        },
    },
)]
/// Archive a file the same way `backup` does, then replace the source with
/// a stub marker (zero-length, tagged with the archived object's uuid)
/// freeing the space it occupied on the source product.
fn stub(
    src_product: String,
    src_store: String,
    dest_product: String,
    dest_store: String,
    input: String,
    output: String,
    _param: Value,
) -> Result<(), Error> {
    let (bytes, dest_id) = run_copy(&src_product, &src_store, &dest_product, &dest_store, &input, &output)?;
    log::info!("stub: archived {bytes} bytes from {src_product}/{src_store}:{input} to {dest_product}/{dest_store} ({})", dest_id.uuid_str());

    let cfg = ArchiveStoreConfig::load_default()?;
    let engine = engine_from_config(&cfg);
    let src_tree = engine.mktree(&tree_config(&src_product, &src_store, false));
    let mut src_file = open_file(&src_tree, Location::new(src_product.as_str(), src_store.as_str(), input.as_str()))?;

    let mut truncate_req = ArchTls::alloc_iopx_req(OpKind::Ftruncate);
    truncate_req.offset = 0;
    let truncate_result = src_tree.call(&mut src_file, &mut truncate_req);
    ArchTls::release_req(truncate_req);
    truncate_result.map_err(|err| anyhow::anyhow!("stub truncate: {err}"))?;

    let mut xattr_req = ArchTls::alloc_iopx_req(OpKind::Fsetxattr);
    xattr_req.xattr_name = "user.oarch_stub_uuid".to_string();
    xattr_req.xattr_value = dest_id.uuid_str().as_bytes().to_vec();
    let xattr_result = src_tree.call(&mut src_file, &mut xattr_req);
    ArchTls::release_req(xattr_req);
    if let Err(err) = xattr_result {
        // Stub marking is best-effort metadata; a source product/filesystem
        // that cannot carry xattrs still ends up stubbed (truncated), just
        // without the back-reference to the archived object.
        log::warn!("stub: could not tag {input} with archived uuid: {err}");
    }

    Ok(())
}

#[api(
    input: {
        properties: {
            "type": { schema: SCAN_TYPE_SCHEMA },
            "src-product": { schema: PRODUCT_SCHEMA },
            "src-store": { schema: STORE_SCHEMA },
            output: { schema: PATH_SCHEMA },
        },
    },
)]
/// Walk a source product/store and write a newline-delimited collect-file
/// of every path found.
fn scan(
    src_product: String,
    src_store: String,
    output: String,
    param: Value,
) -> Result<(), Error> {
    // "type" is a Rust keyword, so it is read out of `param` rather than
    // bound as a typed argument, the same way the teacher's CLI handlers
    // pull awkward-to-bind properties straight out of the raw parameters.
    let scan_type_str = param["type"].as_str().unwrap_or_default();
    let scan_type = match scan_type_str {
        "full" => oarch_types::ScanType::Full,
        "incr" => oarch_types::ScanType::Incremental,
        other => bail!("unknown scan type '{other}', expected 'full' or 'incr'"),
    };
    if scan_type == oarch_types::ScanType::Incremental {
        // The core keeps no scan-state of its own (`spec.md` §6, "persisted
        // state: none internal to the core"); incremental filtering is a
        // driver-side concern this reference driver does not implement, so
        // `incr` currently walks the same full tree as `full`.
        log::warn!("scan: incremental scan state is not tracked by this driver; falling back to a full walk");
    }

    let cfg = ArchiveStoreConfig::load_default()?;
    let engine = engine_from_config(&cfg);
    let src_tree = engine.mktree(&tree_config(&src_product, &src_store, true));

    let mut file = ArchTls::alloc_arch_file(Location::new(src_product.as_str(), src_store.as_str(), "."));
    let mut scan_req = ArchTls::alloc_iopx_req(OpKind::Scan);
    scan_req.path = Some(PathBuf::from("."));
    let scan_result = src_tree.call(&mut file, &mut scan_req);
    if let Err(err) = scan_result {
        ArchTls::release_req(scan_req);
        bail!("scan: {err}");
    }

    let entries = scan_req.result_hosts.len();
    let body = scan_req.result_hosts.join("\n");
    ArchTls::release_req(scan_req);
    std::fs::write(&output, body).map_err(|err| anyhow::anyhow!("writing collect-file {output}: {err}"))?;
    log::info!("scan: wrote {entries} entries to {output}");
    Ok(())
}

fn main() -> Result<(), Error> {
    init_cli_logger("OARCH_LOG", "info");

    let cmd_def = CliCommandMap::new()
        .insert("backup", CliCommand::new(&API_METHOD_BACKUP))
        .insert("stub", CliCommand::new(&API_METHOD_STUB))
        .insert("scan", CliCommand::new(&API_METHOD_SCAN));

    let rpcenv = CliEnvironment::new();
    run_cli_command(cmd_def, rpcenv, None);

    Ok(())
}
