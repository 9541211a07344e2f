use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions, MethodDescriptorProto,
    OneofDescriptorProto, ServiceDescriptorProto,
};

fn camel(name: &str) -> String {
    name.split('_')
        .map(|p| {
            let mut c = p.chars();
            match c.next() {
                Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn json_name(name: &str) -> String {
    let mut out = String::new();
    let mut upper = false;
    for ch in name.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn scalar(name: &str, number: i32, typ: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(typ as i32),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn rep_scalar(name: &str, number: i32, typ: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Repeated as i32),
        r#type: Some(typ as i32),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn msg_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::Message as i32),
        type_name: Some(type_name.into()),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn rep_msg_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Repeated as i32),
        r#type: Some(Type::Message as i32),
        type_name: Some(type_name.into()),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn enum_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::Enum as i32),
        type_name: Some(type_name.into()),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn oneof_field(name: &str, number: i32, type_name: &str, idx: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        oneof_index: Some(idx),
        ..msg_field(name, number, type_name)
    }
}

// map<string,string> field plus its synthetic MapEntry nested message.
fn map_field(
    name: &str,
    number: i32,
    parent_fq: &str,
) -> (FieldDescriptorProto, DescriptorProto) {
    let entry_name = format!("{}Entry", camel(name));
    let field = FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Repeated as i32),
        r#type: Some(Type::Message as i32),
        type_name: Some(format!("{parent_fq}.{entry_name}")),
        json_name: Some(json_name(name)),
        ..Default::default()
    };
    let entry = DescriptorProto {
        name: Some(entry_name),
        field: vec![
            scalar("key", 1, Type::String),
            scalar("value", 2, Type::String),
        ],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };
    (field, entry)
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.into()),
        field: fields,
        ..Default::default()
    }
}

fn enum_desc(name: &str, values: &[(&str, i32)]) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(name.into()),
        value: values
            .iter()
            .map(|(n, v)| EnumValueDescriptorProto {
                name: Some((*n).into()),
                number: Some(*v),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn oneof(name: &str) -> OneofDescriptorProto {
    OneofDescriptorProto {
        name: Some(name.into()),
        ..Default::default()
    }
}

fn method(name: &str, input: &str, output: &str) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.into()),
        input_type: Some(format!(".csi.v1.{input}")),
        output_type: Some(format!(".csi.v1.{output}")),
        options: Some(Default::default()),
        ..Default::default()
    }
}

fn wrappers_file() -> FileDescriptorProto {
    let wrapper = |msg_name: &str, typ: Type| DescriptorProto {
        name: Some(msg_name.into()),
        field: vec![scalar("value", 1, typ)],
        ..Default::default()
    };
    FileDescriptorProto {
        name: Some("google/protobuf/wrappers.proto".into()),
        package: Some("google.protobuf".into()),
        syntax: Some("proto3".into()),
        message_type: vec![
            wrapper("DoubleValue", Type::Double),
            wrapper("FloatValue", Type::Float),
            wrapper("Int64Value", Type::Int64),
            wrapper("UInt64Value", Type::Uint64),
            wrapper("Int32Value", Type::Int32),
            wrapper("UInt32Value", Type::Uint32),
            wrapper("BoolValue", Type::Bool),
            wrapper("StringValue", Type::String),
            wrapper("BytesValue", Type::Bytes),
        ],
        ..Default::default()
    }
}

fn csi_file() -> FileDescriptorProto {
    let mut messages = Vec::new();

    messages.push(message("GetPluginInfoRequest", vec![]));

    let (manifest_f, manifest_e) = map_field("manifest", 3, ".csi.v1.GetPluginInfoResponse");
    messages.push(DescriptorProto {
        nested_type: vec![manifest_e],
        ..message(
            "GetPluginInfoResponse",
            vec![
                scalar("name", 1, Type::String),
                scalar("vendor_version", 2, Type::String),
                manifest_f,
            ],
        )
    });

    messages.push(message("GetPluginCapabilitiesRequest", vec![]));

    messages.push(message(
        "GetPluginCapabilitiesResponse",
        vec![rep_msg_field("capabilities", 1, ".csi.v1.PluginCapability")],
    ));

    messages.push(DescriptorProto {
        nested_type: vec![
            DescriptorProto {
                enum_type: vec![enum_desc(
                    "Type",
                    &[
                        ("UNKNOWN", 0),
                        ("CONTROLLER_SERVICE", 1),
                        ("VOLUME_ACCESSIBILITY_CONSTRAINTS", 2),
                        ("GROUP_CONTROLLER_SERVICE", 3),
                    ],
                )],
                ..message(
                    "Service",
                    vec![enum_field("type", 1, ".csi.v1.PluginCapability.Service.Type")],
                )
            },
            DescriptorProto {
                enum_type: vec![enum_desc(
                    "Type",
                    &[("UNKNOWN", 0), ("ONLINE", 1), ("OFFLINE", 2)],
                )],
                ..message(
                    "VolumeExpansion",
                    vec![enum_field(
                        "type",
                        1,
                        ".csi.v1.PluginCapability.VolumeExpansion.Type",
                    )],
                )
            },
        ],
        oneof_decl: vec![oneof("type")],
        ..message(
            "PluginCapability",
            vec![
                oneof_field("service", 1, ".csi.v1.PluginCapability.Service", 0),
                oneof_field(
                    "volume_expansion",
                    2,
                    ".csi.v1.PluginCapability.VolumeExpansion",
                    0,
                ),
            ],
        )
    });

    messages.push(message("ProbeRequest", vec![]));

    messages.push(message(
        "ProbeResponse",
        vec![msg_field("ready", 1, ".google.protobuf.BoolValue")],
    ));

    messages.push(DescriptorProto {
        nested_type: vec![
            message("BlockVolume", vec![]),
            message(
                "MountVolume",
                vec![
                    scalar("fs_type", 1, Type::String),
                    rep_scalar("mount_flags", 2, Type::String),
                    scalar("volume_mount_group", 3, Type::String),
                ],
            ),
            DescriptorProto {
                enum_type: vec![enum_desc(
                    "Mode",
                    &[
                        ("UNKNOWN", 0),
                        ("SINGLE_NODE_WRITER", 1),
                        ("SINGLE_NODE_READER_ONLY", 2),
                        ("MULTI_NODE_READER_ONLY", 3),
                        ("MULTI_NODE_SINGLE_WRITER", 4),
                        ("MULTI_NODE_MULTI_WRITER", 5),
                        ("SINGLE_NODE_SINGLE_WRITER", 6),
                        ("SINGLE_NODE_MULTI_WRITER", 7),
                    ],
                )],
                ..message(
                    "AccessMode",
                    vec![enum_field(
                        "mode",
                        1,
                        ".csi.v1.VolumeCapability.AccessMode.Mode",
                    )],
                )
            },
        ],
        oneof_decl: vec![oneof("access_type")],
        ..message(
            "VolumeCapability",
            vec![
                oneof_field("block", 1, ".csi.v1.VolumeCapability.BlockVolume", 0),
                oneof_field("mount", 2, ".csi.v1.VolumeCapability.MountVolume", 0),
                msg_field("access_mode", 3, ".csi.v1.VolumeCapability.AccessMode"),
            ],
        )
    });

    messages.push(message(
        "CapacityRange",
        vec![
            scalar("required_bytes", 1, Type::Int64),
            scalar("limit_bytes", 2, Type::Int64),
        ],
    ));

    let (segments_f, segments_e) = map_field("segments", 1, ".csi.v1.Topology");
    messages.push(DescriptorProto {
        nested_type: vec![segments_e],
        ..message("Topology", vec![segments_f])
    });

    let (pub_ctx_f, pub_ctx_e) = map_field("publish_context", 2, ".csi.v1.NodeStageVolumeRequest");
    let (secrets_f, secrets_e) = map_field("secrets", 5, ".csi.v1.NodeStageVolumeRequest");
    let (vol_ctx_f, vol_ctx_e) = map_field("volume_context", 6, ".csi.v1.NodeStageVolumeRequest");
    messages.push(DescriptorProto {
        nested_type: vec![pub_ctx_e, secrets_e, vol_ctx_e],
        ..message(
            "NodeStageVolumeRequest",
            vec![
                scalar("volume_id", 1, Type::String),
                pub_ctx_f,
                scalar("staging_target_path", 3, Type::String),
                msg_field("volume_capability", 4, ".csi.v1.VolumeCapability"),
                secrets_f,
                vol_ctx_f,
            ],
        )
    });

    messages.push(message("NodeStageVolumeResponse", vec![]));

    messages.push(message(
        "NodeUnstageVolumeRequest",
        vec![
            scalar("volume_id", 1, Type::String),
            scalar("staging_target_path", 2, Type::String),
        ],
    ));

    messages.push(message("NodeUnstageVolumeResponse", vec![]));

    let (pub_ctx_f, pub_ctx_e) =
        map_field("publish_context", 2, ".csi.v1.NodePublishVolumeRequest");
    let (secrets_f, secrets_e) = map_field("secrets", 7, ".csi.v1.NodePublishVolumeRequest");
    let (vol_ctx_f, vol_ctx_e) =
        map_field("volume_context", 8, ".csi.v1.NodePublishVolumeRequest");
    messages.push(DescriptorProto {
        nested_type: vec![pub_ctx_e, secrets_e, vol_ctx_e],
        ..message(
            "NodePublishVolumeRequest",
            vec![
                scalar("volume_id", 1, Type::String),
                pub_ctx_f,
                scalar("staging_target_path", 3, Type::String),
                scalar("target_path", 4, Type::String),
                msg_field("volume_capability", 5, ".csi.v1.VolumeCapability"),
                scalar("readonly", 6, Type::Bool),
                secrets_f,
                vol_ctx_f,
            ],
        )
    });

    messages.push(message("NodePublishVolumeResponse", vec![]));

    messages.push(message(
        "NodeUnpublishVolumeRequest",
        vec![
            scalar("volume_id", 1, Type::String),
            scalar("target_path", 2, Type::String),
        ],
    ));

    messages.push(message("NodeUnpublishVolumeResponse", vec![]));

    messages.push(message(
        "NodeGetVolumeStatsRequest",
        vec![
            scalar("volume_id", 1, Type::String),
            scalar("volume_path", 2, Type::String),
            scalar("staging_target_path", 3, Type::String),
        ],
    ));

    messages.push(message(
        "NodeGetVolumeStatsResponse",
        vec![rep_msg_field("usage", 1, ".csi.v1.VolumeUsage")],
    ));

    messages.push(DescriptorProto {
        enum_type: vec![enum_desc(
            "Unit",
            &[("UNKNOWN", 0), ("BYTES", 1), ("INODES", 2)],
        )],
        ..message(
            "VolumeUsage",
            vec![
                scalar("available", 1, Type::Int64),
                scalar("total", 2, Type::Int64),
                scalar("used", 3, Type::Int64),
                enum_field("unit", 4, ".csi.v1.VolumeUsage.Unit"),
            ],
        )
    });

    messages.push(message(
        "NodeExpandVolumeRequest",
        vec![
            scalar("volume_id", 1, Type::String),
            scalar("volume_path", 2, Type::String),
            msg_field("capacity_range", 3, ".csi.v1.CapacityRange"),
            scalar("staging_target_path", 4, Type::String),
            msg_field("volume_capability", 5, ".csi.v1.VolumeCapability"),
        ],
    ));

    messages.push(message(
        "NodeExpandVolumeResponse",
        vec![scalar("capacity_bytes", 1, Type::Int64)],
    ));

    messages.push(message("NodeGetCapabilitiesRequest", vec![]));

    messages.push(message(
        "NodeGetCapabilitiesResponse",
        vec![rep_msg_field(
            "capabilities",
            1,
            ".csi.v1.NodeServiceCapability",
        )],
    ));

    messages.push(DescriptorProto {
        nested_type: vec![DescriptorProto {
            enum_type: vec![enum_desc(
                "Type",
                &[
                    ("UNKNOWN", 0),
                    ("STAGE_UNSTAGE_VOLUME", 1),
                    ("GET_VOLUME_STATS", 2),
                    ("EXPAND_VOLUME", 3),
                    ("VOLUME_CONDITION", 4),
                    ("SINGLE_NODE_MULTI_WRITER", 5),
                    ("VOLUME_MOUNT_GROUP", 6),
                ],
            )],
            ..message(
                "RPC",
                vec![enum_field("type", 1, ".csi.v1.NodeServiceCapability.RPC.Type")],
            )
        }],
        oneof_decl: vec![oneof("type")],
        ..message(
            "NodeServiceCapability",
            vec![oneof_field("rpc", 1, ".csi.v1.NodeServiceCapability.RPC", 0)],
        )
    });

    messages.push(message("NodeGetInfoRequest", vec![]));

    messages.push(message(
        "NodeGetInfoResponse",
        vec![
            scalar("node_id", 1, Type::String),
            scalar("max_volumes_per_node", 2, Type::Int64),
            msg_field("accessible_topology", 3, ".csi.v1.Topology"),
        ],
    ));

    let identity = ServiceDescriptorProto {
        name: Some("Identity".into()),
        method: vec![
            method("GetPluginInfo", "GetPluginInfoRequest", "GetPluginInfoResponse"),
            method(
                "GetPluginCapabilities",
                "GetPluginCapabilitiesRequest",
                "GetPluginCapabilitiesResponse",
            ),
            method("Probe", "ProbeRequest", "ProbeResponse"),
        ],
        ..Default::default()
    };

    let node = ServiceDescriptorProto {
        name: Some("Node".into()),
        method: vec![
            method("NodeStageVolume", "NodeStageVolumeRequest", "NodeStageVolumeResponse"),
            method(
                "NodeUnstageVolume",
                "NodeUnstageVolumeRequest",
                "NodeUnstageVolumeResponse",
            ),
            method(
                "NodePublishVolume",
                "NodePublishVolumeRequest",
                "NodePublishVolumeResponse",
            ),
            method(
                "NodeUnpublishVolume",
                "NodeUnpublishVolumeRequest",
                "NodeUnpublishVolumeResponse",
            ),
            method(
                "NodeGetVolumeStats",
                "NodeGetVolumeStatsRequest",
                "NodeGetVolumeStatsResponse",
            ),
            method(
                "NodeExpandVolume",
                "NodeExpandVolumeRequest",
                "NodeExpandVolumeResponse",
            ),
            method(
                "NodeGetCapabilities",
                "NodeGetCapabilitiesRequest",
                "NodeGetCapabilitiesResponse",
            ),
            method("NodeGetInfo", "NodeGetInfoRequest", "NodeGetInfoResponse"),
        ],
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some("csi.proto".into()),
        package: Some("csi.v1".into()),
        dependency: vec!["google/protobuf/wrappers.proto".into()],
        syntax: Some("proto3".into()),
        message_type: messages,
        service: vec![identity, node],
        ..Default::default()
    }
}

fn main() {
    let fds = FileDescriptorSet {
        file: vec![wrappers_file(), csi_file()],
    };
    let bytes = fds.encode_to_vec();
    let out = std::env::args().nth(1).expect("usage: fdsgen <out-path>");
    std::fs::write(&out, &bytes).expect("write descriptor set");
    eprintln!("wrote {} bytes to {}", bytes.len(), out);
}
