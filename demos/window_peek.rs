use std::env;
use vfio_cma::{CmaConfig, CmaContext, CmaError, CmaResult};

fn parse_hex(arg: &str) -> Option<u64> {
    u64::from_str_radix(arg.trim_start_matches("0x"), 16).ok()
}

fn main() -> CmaResult<()> {
    let phys = env::args()
        .nth(1)
        .and_then(|a| parse_hex(&a))
        .unwrap_or(0x8000_0000);

    let ctx = CmaContext::initialize(&CmaConfig::from_env())?;

    let ptr = match ctx.map_window(phys, 4) {
        Ok(ptr) => ptr,
        Err(e @ CmaError::OutOfWindow { .. }) => {
            eprintln!("0x{phys:x} is not inside the device window: {e}");
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let value = unsafe { ptr.as_ptr().cast::<u32>().read_volatile() };
    println!("[0x{phys:08x}] = 0x{value:08x}");

    unsafe { ctx.unmap_window(ptr, 4) }
}
