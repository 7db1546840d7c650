// 该文件是 Pingjian （瓶检） 项目的一部分。
// src/model/labels.rs - 类别表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{collections::BTreeMap, fmt};

use serde::Serialize;

/// 类别索引到类别名称的映射
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ClassNames {
  names: Box<[String]>,
}

impl ClassNames {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.names.get(class_id as usize).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
    self
      .names
      .iter()
      .enumerate()
      .map(|(idx, name)| (idx as u32, name.as_str()))
  }

  /// 逗号分隔的类别列表，例如 `bad,good`
  pub fn from_list(list: &str) -> Option<Self> {
    let names: Vec<&str> = list
      .split(',')
      .map(str::trim)
      .filter(|name| !name.is_empty())
      .collect();
    if names.is_empty() {
      return None;
    }
    Some(Self::new(names))
  }

  /// 解析 Ultralytics 导出模型元数据中的 `names` 字段
  ///
  /// 支持 `{0: 'bad', 1: 'good'}` 与 `['bad', 'good']` 两种写法，
  /// 字典形式要求索引从 0 开始连续。
  pub fn parse_metadata(raw: &str) -> Option<Self> {
    let raw = raw.trim();
    if let Some(body) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
      let mut table = BTreeMap::new();
      let mut rest = body.trim();
      while !rest.is_empty() {
        let (key, after_key) = rest.split_once(':')?;
        let class_id: u32 = key.trim().parse().ok()?;
        let (name, after_name) = take_quoted(after_key.trim_start())?;
        table.insert(class_id, name);
        rest = after_name.trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
      }
      if table.is_empty() {
        return None;
      }
      // 索引必须连续
      if table.keys().enumerate().any(|(idx, &key)| idx as u32 != key) {
        return None;
      }
      return Some(Self::new(table.into_values()));
    }

    if let Some(body) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
      let mut names = Vec::new();
      let mut rest = body.trim();
      while !rest.is_empty() {
        let (name, after_name) = take_quoted(rest)?;
        names.push(name);
        rest = after_name.trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
      }
      if names.is_empty() {
        return None;
      }
      return Some(Self::new(names));
    }

    None
  }
}

/// 读取一个以单引号或双引号包裹的字符串，返回内容与剩余部分
fn take_quoted(input: &str) -> Option<(String, &str)> {
  let quote = input.chars().next().filter(|c| *c == '\'' || *c == '"')?;
  let body = &input[1..];
  let end = body.find(quote)?;
  Some((body[..end].to_string(), &body[end + 1..]))
}

impl fmt::Display for ClassNames {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{")?;
    for (idx, name) in self.iter() {
      if idx > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}: {}", idx, name)?;
    }
    write!(f, "}}")
  }
}
