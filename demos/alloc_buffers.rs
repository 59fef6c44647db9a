use vfio_cma::{CmaConfig, CmaContext, CmaResult};

fn main() -> CmaResult<()> {
    println!("--- VFIO CMA Buffer Allocation ---");

    let config = CmaConfig::from_env();
    println!("Device: {}", config.device_name);

    // 1. Bind the device (once per process)
    let mut ctx = match CmaContext::initialize(&config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error binding device (is it bound to vfio-platform?): {e}");
            return Err(e);
        }
    };
    println!(
        "Region 0: offset 0x{:x}, size 0x{:x}",
        ctx.binding().region.offset,
        ctx.binding().region.size
    );

    // 2. Allocate a few buffers and show their device addresses
    let sizes = [4096usize, 8192, 100];
    let mut buffers = Vec::new();
    for &len in &sizes {
        let buf = ctx.allocate(len, false)?;
        let iova = ctx.device_address_of(buf.as_ptr()).unwrap_or(0);
        println!("  - {len:>6} bytes at {:p} -> IOVA 0x{iova:08x}", buf.as_ptr());
        buffers.push((buf, len));
    }

    // 3. Write a pattern and push it out of the CPU caches
    for (buf, len) in &buffers {
        unsafe {
            buf.as_ptr().write_bytes(0xA5, *len);
            ctx.flush(buf.as_ptr(), 0, *len);
        }
    }

    // 4. Release everything
    for (buf, _) in buffers {
        ctx.free(buf.as_ptr())?;
    }
    println!("Next IOVA: 0x{:08x}", ctx.allocator().next_iova());

    Ok(())
}
