#![no_main]

use libfuzzer_sys::fuzz_target;
use monitor_core::{
    evaluate, CallTracer, FunctionSymbol, GuestMachine, Lexer, TransferKind, GUEST_MEMORY_BASE,
};

fuzz_target!(|data: &[u8]| {
    let mut machine = GuestMachine::new(256);
    let _ = machine.set_register("sp", GUEST_MEMORY_BASE + 16);
    let _ = machine.load_bytes(GUEST_MEMORY_BASE, &data[..data.len().min(256)]);

    let input = String::from_utf8_lossy(data);
    if let Ok(tokens) = Lexer::new(1024).tokenize(&input) {
        let _ = evaluate(&tokens, &machine);
    }

    let _ = monitor_core::parse_function_symbols(data);

    let mut tracer = CallTracer::new(vec![FunctionSymbol {
        name: "f".into(),
        address: 0x40,
    }]);
    for chunk in data.chunks_exact(9) {
        let kind = if chunk[0] & 1 == 0 {
            TransferKind::Call
        } else {
            TransferKind::Return
        };
        let pc = u32::from_le_bytes([chunk[1], chunk[2], chunk[3], chunk[4]]);
        let target = u32::from_le_bytes([chunk[5], chunk[6], chunk[7], chunk[8]]);
        tracer.record(kind, pc, target);
    }
    let _ = tracer.report().to_string();
});
