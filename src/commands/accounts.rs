//! Account mapping commands: derive, show, check.

use anyhow::Result;

use fb_accounts::{
    find_seed_collision, fingerprint_from_accounts, load_accounts, probe_account_exists,
    segment_metas, AddressDeriver, FsKeypairResolver, LegacyDeriver, Registry, SeededDeriver,
};

use crate::args::{AccountsArgs, AccountsCheckArgs, AccountsCommand, AccountsDeriveArgs, AccountsShowArgs};

pub fn run(args: &AccountsArgs) -> Result<i32> {
    match &args.command {
        AccountsCommand::Derive(args) => derive(args),
        AccountsCommand::Show(args) => show(args),
        AccountsCommand::Check(args) => check(args),
    }
}

fn derive(args: &AccountsDeriveArgs) -> Result<i32> {
    let resolver = FsKeypairResolver;
    let deriver: &dyn AddressDeriver = if args.legacy {
        &LegacyDeriver
    } else {
        &SeededDeriver
    };
    let (context, metas) = segment_metas(
        &args.accounts,
        args.program_id.as_deref(),
        args.payer.as_deref(),
        &resolver,
        deriver,
    )?;
    if let Some(seed) = context.vm_seed {
        println!("vm_seed: {seed}");
    }
    println!("vm: {}", context.vm_pubkey);
    for meta in &metas {
        println!("{}", meta.to_line());
    }
    Ok(0)
}

fn show(args: &AccountsShowArgs) -> Result<i32> {
    let accounts = load_accounts(&args.accounts)?;
    println!("Accounts:");
    if let Some(rpc_url) = &accounts.cluster.rpc_url {
        println!("  rpc_url: {rpc_url}");
    }
    if let Some(program_id) = &accounts.cluster.program_id {
        println!("  program_id: {program_id}");
    }
    if let Some(payer) = &accounts.cluster.payer {
        println!("  payer: {payer}");
    }
    if let Some(seed) = accounts.vm.seed {
        println!("  vm_seed: {seed}");
    }

    // Derivation failures still leave the declared view printable.
    let resolver = FsKeypairResolver;
    match segment_metas(
        &args.accounts,
        args.program_id.as_deref(),
        args.payer.as_deref(),
        &resolver,
        &SeededDeriver,
    ) {
        Ok((context, metas)) => {
            println!("  vm: {}", context.vm_pubkey);
            if metas.is_empty() {
                println!("  segments: <none>");
            } else {
                println!("  segments:");
                for meta in &metas {
                    println!("    {}", meta.to_line());
                }
            }
        }
        Err(err) => {
            println!("  vm: {}", accounts.vm.pubkey.as_deref().unwrap_or("<missing>"));
            println!("  error: {err}");
        }
    }
    Ok(0)
}

fn check(args: &AccountsCheckArgs) -> Result<i32> {
    let resolver = FsKeypairResolver;
    let (context, metas) = segment_metas(
        &args.accounts,
        args.program_id.as_deref(),
        args.payer.as_deref(),
        &resolver,
        &SeededDeriver,
    )?;
    println!("OK: {} segment(s), vm {}", metas.len(), context.vm_pubkey);

    let Some(fingerprint) = fingerprint_from_accounts(
        &args.accounts,
        args.rpc_url.as_deref(),
        args.program_id.as_deref(),
        args.payer.as_deref(),
        &resolver,
        &SeededDeriver,
    )?
    else {
        println!("Seed collision check skipped (accounts file is not seed-driven)");
        return Ok(0);
    };

    let registry = Registry::new(
        args.registry
            .clone()
            .unwrap_or_else(Registry::default_path),
    );
    let project_dir = args.accounts.parent().map(std::path::Path::to_path_buf);
    let collision = find_seed_collision(
        &registry,
        &fingerprint,
        project_dir.as_deref(),
        &resolver,
        &SeededDeriver,
    )?;

    let mut exit = 0;
    match collision {
        Some((project, other)) => {
            eprintln!(
                "Seed collision: project '{}' ({}) already derives vm {} from seed {}",
                project.name,
                project.path.display(),
                other.vm_pubkey,
                other.vm_seed
            );
            exit = 1;
        }
        None => println!("No seed collisions in registry"),
    }

    if args.probe {
        let rpc_url = args
            .rpc_url
            .clone()
            .or(context.rpc_url)
            .ok_or_else(|| anyhow::anyhow!("--probe requires an rpc_url"))?;
        let exists = probe_account_exists(&rpc_url, &context.vm_pubkey)?;
        if exists {
            println!("VM account exists on {rpc_url}");
        } else {
            println!("VM account not found on {rpc_url}");
        }
    }
    Ok(exit)
}
