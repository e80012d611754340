#![no_main]

use libfuzzer_sys::fuzz_target;
use hwmp_protocol::elements::{encode_elements, PathSelectionElement, PathSelectionFrame};
use hwmp_protocol::frame::decode_path_selection;

fuzz_target!(|data: &[u8]| {
    // Arbitrary action payloads must never panic the decoder
    let _ = decode_path_selection(data);

    if let Ok(frame) = PathSelectionFrame::decode(data) {
        // Anything accepted re-encodes to bytes the decoder accepts again
        let mut elements = Vec::new();
        elements.extend(frame.ranns.iter().cloned().map(PathSelectionElement::Rann));
        elements.extend(frame.preqs.iter().cloned().map(PathSelectionElement::Preq));
        elements.extend(frame.preps.iter().cloned().map(PathSelectionElement::Prep));
        elements.extend(frame.perrs.iter().cloned().map(PathSelectionElement::Perr));

        let reencoded = encode_elements(&elements);
        assert_eq!(PathSelectionFrame::decode(&reencoded), Ok(frame));
    }
});
