use register_codec::{decode_raw, decode_scaled, decode_text, serial_from_words, DataType, DecodeError};

#[test]
fn u16_voltage_scaled_to_whole_volts() {
    let value = decode_scaled(&[2_304], DataType::U16, 0.1, 0).expect("decode");
    assert_eq!(value, 230.0);
}

#[test]
fn u16_current_keeps_two_digits() {
    let value = decode_scaled(&[123], DataType::U16, 0.1, 2).expect("decode");
    assert_eq!(value, 12.3);
}

#[test]
fn u32_uses_big_endian_word_order() {
    let value = decode_scaled(&[0x0001, 0x0002], DataType::U32, 1.0, 0).expect("decode");
    assert_eq!(value, 65_538.0);
}

#[test]
fn f32_decodes_ieee754_bits() {
    let bits = 1_234.5f32.to_bits();
    let words = [(bits >> 16) as u16, bits as u16];
    let value = decode_scaled(&words, DataType::F32, 1.0, 1).expect("decode");
    assert_eq!(value, 1_234.5);
}

#[test]
fn percentage_register_scales_down() {
    let value = decode_scaled(&[5_000], DataType::U16, 0.01, 0).expect("decode");
    assert_eq!(value, 50.0);
}

#[test]
fn text_strips_padding() {
    let words = [0x5341, 0x4d50, 0x4c45, 0x0000];
    assert_eq!(decode_text(&words, 4).expect("decode"), "SAMPLE");
}

#[test]
fn serial_reverses_each_hex_rendering() {
    let serial = serial_from_words(&[0x1234, 0x00ab, 0x0c0d, 0x0000]);
    assert_eq!(serial, "4321bad0c0");
}

#[test]
fn insufficient_words_fail_for_every_type() {
    for data_type in [DataType::U16, DataType::U32, DataType::F32] {
        let words = vec![0u16; data_type.word_count() - 1];
        let err = decode_scaled(&words, data_type, 1.0, 0).expect_err("short payload");
        assert!(matches!(err, DecodeError::InsufficientWords { .. }));
    }
    assert!(decode_text(&[0x4142, 0x4344], 4).is_err());
}

#[test]
fn unknown_type_names_are_rejected() {
    assert_eq!("u16".parse::<DataType>(), Ok(DataType::U16));
    assert_eq!("float".parse::<DataType>(), Ok(DataType::F32));
    assert_eq!(
        "i64".parse::<DataType>(),
        Err(DecodeError::UnknownType("i64".to_string()))
    );
}

#[test]
fn strings_are_not_numeric() {
    assert_eq!(
        decode_raw(&[0x4142; 4], DataType::String(4)),
        Err(DecodeError::NotNumeric(DataType::String(4)))
    );
}
